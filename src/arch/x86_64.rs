//! # x86_64 Port (System V ABI)
//!
//! Callee-saved state is `rbx`, `rbp` and `r12`–`r15`; it is pushed onto
//! the suspended thread's own stack, so a saved context is a single stack
//! pointer.
//!
//! ## Initial Frame
//!
//! ```text
//! [top, 16-byte aligned]
//!   16 bytes padding      <- rsp after `ret`, aligned for the `call`
//!   ret   (greenrt_context_entry)
//!   rbp   (0)
//!   rbx   (0)
//!   r12   (entry)
//!   r13   (arg)
//!   r14   (0)
//!   r15   (0)             <- saved stack pointer
//! ```

use core::arch::global_asm;

use super::EntryFn;

global_asm!(
    ".text",
    ".p2align 4",
    ".global greenrt_context_switch",
    ".type greenrt_context_switch,@function",
    "greenrt_context_switch:",
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, rsi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
    ".size greenrt_context_switch, .-greenrt_context_switch",
    "",
    ".p2align 4",
    ".global greenrt_context_entry",
    ".type greenrt_context_entry,@function",
    "greenrt_context_entry:",
    ".cfi_startproc",
    ".cfi_undefined rip",
    "mov rdi, r13",
    "call r12",
    "ud2",
    ".cfi_endproc",
    ".size greenrt_context_entry, .-greenrt_context_entry",
);

const FRAME_WORDS: usize = 7;
const PADDING: usize = 16;

/// Write the initial frame below `top` and return the stack pointer to
/// store in the context.
///
/// # Safety
/// `top` must be the 16-byte aligned end of a writable stack with room for
/// the frame.
pub(super) unsafe fn initial_frame(
    top: *mut u8,
    entry: EntryFn,
    arg: *mut u8,
    trampoline: usize,
) -> *mut u8 {
    debug_assert_eq!(top as usize % 16, 0);
    let frame = top.sub(PADDING + FRAME_WORDS * 8) as *mut u64;
    for i in 0..FRAME_WORDS {
        frame.add(i).write(0);
    }
    frame.add(2).write(arg as u64); // r13
    frame.add(3).write(entry as usize as u64); // r12
    frame.add(6).write(trampoline as u64); // return address
    (top.sub(PADDING) as *mut u64).write(0);
    (top.sub(PADDING - 8) as *mut u64).write(0);
    frame as *mut u8
}
