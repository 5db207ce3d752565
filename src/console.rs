//! Preemption-safe console output.
//!
//! `std::print!` takes the stdout lock and may allocate, neither of which
//! is allowed while a tick can switch threads. [`uprint!`](crate::uprint)
//! and [`uprintln!`](crate::uprintln) do the same work inside a critical
//! section.

use std::fmt;
use std::io::{self, Write};

use crate::sync;

/// Print to stdout without being interleaved by preemption.
#[macro_export]
macro_rules! uprint {
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!($($arg)*))
    };
}

/// Like [`uprint!`], with a trailing newline.
#[macro_export]
macro_rules! uprintln {
    () => {
        $crate::uprint!("\n")
    };
    ($($arg:tt)*) => {
        $crate::console::_print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    sync::critical_section(|_| {
        print!("{args}");
        let _ = io::stdout().flush();
    });
}
