use crate::boot::Boot;

/// Hand-off for Cortex-M, where a stage starts with its vector table.
///
/// The stack pointer and reset vector are taken from the table; TrustZone state is left as is.
pub struct VectorTableEntry;

impl Boot for VectorTableEntry {
    unsafe fn boot(entry: *const u32) -> ! {
        unsafe { cortex_m::asm::bootload(entry) }
    }
}
