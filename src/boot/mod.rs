//! Architecture-specific hand-off to a loaded stage.

#[cfg(feature = "cortex_m")]
pub mod cortex_m;

/// Final jump into the next stage.
pub trait Boot {
    /// Enter the image at `entry`.
    ///
    /// # Safety
    ///
    /// `entry` must point at a complete, verified image for this architecture.
    unsafe fn boot(entry: *const u32) -> !;
}
