//! # AArch64 Port (AAPCS64)
//!
//! Callee-saved state is `x19`–`x29`, the link register `x30` and the low
//! halves of `v8`–`v15`. The switch routine stores all of them in a
//! 160-byte block on the suspended thread's stack.
//!
//! ## Initial Frame
//!
//! The block is laid out as the switch routine expects it, with `x19`
//! holding the entry function, `x20` the argument and `x30` the trampoline.
//! After the block is popped the stack pointer equals the aligned top.

use core::arch::global_asm;

use super::EntryFn;

global_asm!(
    ".text",
    ".p2align 4",
    ".global greenrt_context_switch",
    ".type greenrt_context_switch,%function",
    "greenrt_context_switch:",
    "sub sp, sp, #160",
    "stp x19, x20, [sp, #0]",
    "stp x21, x22, [sp, #16]",
    "stp x23, x24, [sp, #32]",
    "stp x25, x26, [sp, #48]",
    "stp x27, x28, [sp, #64]",
    "stp x29, x30, [sp, #80]",
    "stp d8, d9, [sp, #96]",
    "stp d10, d11, [sp, #112]",
    "stp d12, d13, [sp, #128]",
    "stp d14, d15, [sp, #144]",
    "mov x9, sp",
    "str x9, [x0]",
    "mov sp, x1",
    "ldp x19, x20, [sp, #0]",
    "ldp x21, x22, [sp, #16]",
    "ldp x23, x24, [sp, #32]",
    "ldp x25, x26, [sp, #48]",
    "ldp x27, x28, [sp, #64]",
    "ldp x29, x30, [sp, #80]",
    "ldp d8, d9, [sp, #96]",
    "ldp d10, d11, [sp, #112]",
    "ldp d12, d13, [sp, #128]",
    "ldp d14, d15, [sp, #144]",
    "add sp, sp, #160",
    "ret",
    ".size greenrt_context_switch, .-greenrt_context_switch",
    "",
    ".p2align 4",
    ".global greenrt_context_entry",
    ".type greenrt_context_entry,%function",
    "greenrt_context_entry:",
    ".cfi_startproc",
    ".cfi_undefined x30",
    "mov x0, x20",
    "blr x19",
    "brk #0",
    ".cfi_endproc",
    ".size greenrt_context_entry, .-greenrt_context_entry",
);

const FRAME_WORDS: usize = 20;

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
    let frame = top.sub(FRAME_WORDS * 8) as *mut u64;
    for i in 0..FRAME_WORDS {
        frame.add(i).write(0);
    }
    frame.add(0).write(entry as usize as u64); // x19
    frame.add(1).write(arg as u64); // x20
    frame.add(11).write(trampoline as u64); // x30
    frame as *mut u8
}
