//! Error type for the fallible parts of the runtime.
//!
//! Thread operations report failure through sentinel [`Tid`](crate::Tid)
//! values; this enum exists for callers that want `?`, and for the
//! environment failures that can happen while arming preemption.

use std::io;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target did not identify an existing, usable thread.
    #[error("target does not name a usable thread")]
    Invalid,

    /// The thread table is full.
    #[error("thread table is full")]
    NoMore,

    /// A wildcard operation found no eligible thread.
    #[error("no eligible thread")]
    None,

    /// Installing the tick handler failed.
    #[error("failed to install SIGALRM handler: {0}")]
    Signal(#[source] io::Error),

    /// Arming or disarming the interval timer failed.
    #[error("failed to program interval timer: {0}")]
    Timer(#[source] io::Error),

    /// The requested tick interval is below the supported minimum.
    #[error("tick interval {0:?} is below the supported minimum")]
    Interval(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
