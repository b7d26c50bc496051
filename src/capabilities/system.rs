//! `sys` namespace.

use std::{thread, time::Duration};

use crate::bridge::{ErrorConvention, Namespace, NativeError};

pub fn namespace() -> Namespace {
    // Sleeps at least one millisecond so a zero delay still yields.
    Namespace::new("sys", ErrorConvention::Raise).function("sleep", |_, ms: i64| {
        if ms < 0 {
            return Err(NativeError::invalid(format!("sleep duration must not be negative: {ms}")));
        }
        thread::sleep(Duration::from_millis(ms.max(1) as u64));
        Ok(())
    })
}
