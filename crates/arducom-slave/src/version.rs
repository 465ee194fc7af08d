use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use arducom_frame::{
    BUFFER_SIZE, FLAG_ENABLE_DEBUG, FLAG_INFINITE_LOOP, FLAG_SOFT_RESET, SHUTDOWN_SENTINEL,
    VERSION,
};

use crate::registry::{CommandError, CommandRegistry, RegistryError};

/// Shared state behind the built-in version command: uptime reference,
/// configuration flags, the descriptive name and an optional shutdown
/// hook.
pub struct SlaveControl {
    started: Instant,
    flags: AtomicU8,
    name: String,
    shutdown: Option<Box<dyn Fn() + Send + Sync>>,
}

impl SlaveControl {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            flags: AtomicU8::new(0),
            name: name.into(),
            shutdown: None,
        })
    }

    /// Like [`SlaveControl::new`] with a hook invoked when the master
    /// sends the shutdown sentinel.
    pub fn with_shutdown_hook(
        name: impl Into<String>,
        hook: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            flags: AtomicU8::new(0),
            name: name.into(),
            shutdown: Some(Box::new(hook)),
        })
    }

    /// Milliseconds since this slave started, wrapping like a
    /// microcontroller millis counter.
    pub fn uptime_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    pub fn flags(&self) -> u8 {
        self.flags.load(Ordering::Relaxed)
    }

    /// Apply `flags` to the bits selected by `mask`.
    ///
    /// The watchdog-driven bits (infinite loop, soft reset) have no
    /// hosted equivalent; they are accepted and logged.
    pub fn set_flags(&self, mask: u8, flags: u8) {
        if mask & FLAG_INFINITE_LOOP != 0 && flags & FLAG_INFINITE_LOOP != 0 {
            warn!("infinite-loop self-test requested; not supported on this target");
        }
        if mask & FLAG_SOFT_RESET != 0 && flags & FLAG_SOFT_RESET != 0 {
            warn!("soft reset requested; not supported on this target");
        }
        let settable = mask & FLAG_ENABLE_DEBUG;
        if settable != 0 {
            let mut current = self.flags.load(Ordering::Relaxed);
            loop {
                let next = (current & !settable) | (flags & settable);
                match self.flags.compare_exchange_weak(
                    current,
                    next,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
        }
    }
}

/// Register the built-in command 0.
///
/// The command accepts an optional two-byte (mask, flags) pair. The
/// shutdown sentinel invokes the control's hook; any other pair applies
/// the flags under the mask. The reply packs protocol version, uptime in
/// milliseconds (LE), the current flags, free RAM (0 on hosted targets)
/// and the descriptive name.
pub fn register_version_command(
    registry: &mut CommandRegistry,
    control: Arc<SlaveControl>,
) -> Result<(), RegistryError> {
    registry.add(
        0,
        None,
        Box::new(move |payload| {
            if payload.len() >= 2 {
                let mask = payload[0];
                let flags = payload[1];
                if u16::from(mask) + (u16::from(flags) << 8) == SHUTDOWN_SENTINEL {
                    debug!("shutdown sentinel received");
                    if let Some(hook) = control.shutdown.as_ref() {
                        hook();
                    }
                } else {
                    control.set_flags(mask, flags);
                }
            }

            let mut reply = Vec::with_capacity(8 + control.name.len());
            reply.push(VERSION);
            reply.extend_from_slice(&control.uptime_ms().to_le_bytes());
            reply.push(control.flags());
            // free RAM: no heap probe on hosted targets
            reply.extend_from_slice(&0u16.to_le_bytes());
            reply.extend_from_slice(control.name.as_bytes());
            if reply.len() > BUFFER_SIZE {
                return Err(CommandError::buffer_overrun(BUFFER_SIZE as u8));
            }
            Ok(reply)
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn reply_layout_without_name() {
        let control = SlaveControl::new("");
        let mut registry = CommandRegistry::new();
        register_version_command(&mut registry, control).unwrap();

        let entry = registry.find_mut(0).unwrap();
        let reply = (entry.handler)(&[]).unwrap();
        assert_eq!(reply.len(), 8);
        assert_eq!(reply[0], VERSION);
        // flags start cleared, free RAM reported as zero
        assert_eq!(reply[5], 0);
        assert_eq!(&reply[6..8], &[0, 0]);
    }

    #[test]
    fn name_is_appended() {
        let control = SlaveControl::new("hello");
        let mut registry = CommandRegistry::new();
        register_version_command(&mut registry, control).unwrap();

        let entry = registry.find_mut(0).unwrap();
        let reply = (entry.handler)(&[]).unwrap();
        assert_eq!(&reply[8..], b"hello");
    }

    #[test]
    fn debug_flag_is_set_under_mask() {
        let control = SlaveControl::new("");
        let mut registry = CommandRegistry::new();
        register_version_command(&mut registry, Arc::clone(&control)).unwrap();

        let entry = registry.find_mut(0).unwrap();
        let reply = (entry.handler)(&[FLAG_ENABLE_DEBUG, FLAG_ENABLE_DEBUG]).unwrap();
        assert_eq!(reply[5] & FLAG_ENABLE_DEBUG, FLAG_ENABLE_DEBUG);
        assert_eq!(control.flags(), FLAG_ENABLE_DEBUG);

        // clearing through the same mask
        let reply = (entry.handler)(&[FLAG_ENABLE_DEBUG, 0]).unwrap();
        assert_eq!(reply[5] & FLAG_ENABLE_DEBUG, 0);
    }

    #[test]
    fn flags_outside_the_mask_are_untouched() {
        let control = SlaveControl::new("");
        control.set_flags(0, FLAG_ENABLE_DEBUG);
        assert_eq!(control.flags(), 0);
    }

    #[test]
    fn shutdown_sentinel_invokes_the_hook() {
        static CALLED: AtomicBool = AtomicBool::new(false);
        let control = SlaveControl::with_shutdown_hook("", || {
            CALLED.store(true, Ordering::SeqCst);
        });
        let mut registry = CommandRegistry::new();
        register_version_command(&mut registry, control).unwrap();

        let entry = registry.find_mut(0).unwrap();
        // 0xADDE = mask 0xDE, flags 0xAD
        (entry.handler)(&[0xDE, 0xAD]).unwrap();
        assert!(CALLED.load(Ordering::SeqCst));
    }

    #[test]
    fn oversized_name_reports_buffer_overrun() {
        let control = SlaveControl::new("x".repeat(BUFFER_SIZE));
        let mut registry = CommandRegistry::new();
        register_version_command(&mut registry, control).unwrap();

        let entry = registry.find_mut(0).unwrap();
        let err = (entry.handler)(&[]).unwrap_err();
        assert_eq!(err, CommandError::buffer_overrun(BUFFER_SIZE as u8));
    }
}
