//! The `xstore` instruction, the only unsafe boundary of the engine.
//!
//! `xstore` (opcode `0f a7 c0`) stores up to 8 random bytes at `es:[edi]`,
//! selecting the bit-sampling divisor from the low two bits of `edx`, and
//! returns a status word in `eax` that mirrors the RNG control register flags
//! plus the number of bytes stored in bits 4:0.

/// Bytes produced per `xstore` at divisor 0.
pub const XSTORE_BASE_STEP: usize = 8;

/// Size of the scratch buffer handed to `xstore`.
///
/// Some chip revisions store more than the documented byte count. The
/// amount is not bounded anywhere, so the buffer spans two cache lines
/// instead of the nominal 8 bytes.
pub const XSTORE_BUFFER_LEN: usize = 128;

/// Scratch space for `xstore`: 16-byte aligned and over-sized for the
/// overrun erratum.
#[repr(C, align(16))]
pub struct XstoreBuffer([u8; XSTORE_BUFFER_LEN]);

impl XstoreBuffer {
    pub const fn new() -> Self {
        Self([0; XSTORE_BUFFER_LEN])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl Default for XstoreBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes produced per `xstore` at `divisor`.
pub fn step_bytes(divisor: u32) -> usize {
    XSTORE_BASE_STEP >> (divisor & 3)
}

/// One invocation of the hardware extraction primitive.
pub trait Xstore {
    /// Store random bytes into `buf` and return the raw status word.
    fn xstore(&mut self, buf: &mut XstoreBuffer, divisor: u32) -> u32;
}

/// The real instruction.
///
/// Only meaningful once detection has confirmed a PadLock RNG on every core;
/// on anything else the opcode faults.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareXstore;

impl Xstore for HardwareXstore {
    #[cfg(target_arch = "x86_64")]
    fn xstore(&mut self, buf: &mut XstoreBuffer, divisor: u32) -> u32 {
        let status: u32;
        // SAFETY: the engine only calls this after CPUID reported a PadLock RNG
        // on every core. `buf` is 16-byte aligned and XSTORE_BUFFER_LEN bytes
        // long, which covers the documented 8 bytes plus the overrun erratum.
        // xstore writes only through rdi and advances it, hence the clobber.
        unsafe {
            core::arch::asm!(
                ".byte 0x0f, 0xa7, 0xc0",
                inout("rdi") buf.0.as_mut_ptr() => _,
                in("edx") divisor & 3,
                out("eax") status,
                options(nostack),
            );
        }
        status
    }

    #[cfg(target_arch = "x86")]
    fn xstore(&mut self, buf: &mut XstoreBuffer, divisor: u32) -> u32 {
        let status: u32;
        // SAFETY: as for x86_64, with edi as the destination pointer.
        unsafe {
            core::arch::asm!(
                ".byte 0x0f, 0xa7, 0xc0",
                inout("edi") buf.0.as_mut_ptr() => _,
                in("edx") divisor & 3,
                out("eax") status,
                options(nostack),
            );
        }
        status
    }

    // No PadLock outside x86; detection never succeeds there, so this is
    // unreachable in practice and reports an empty, disabled status.
    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    fn xstore(&mut self, _buf: &mut XstoreBuffer, _divisor: u32) -> u32 {
        0
    }
}
