//! Capture-to-encoder handoff primitives.
//!
//! | Module  | Purpose                                              |
//! |---------|------------------------------------------------------|
//! | `slot`  | Lossy triple-buffer mailbox with pool bookkeeping    |
//! | `fence` | GPU completion tickets with event and poll back-ends |

pub mod fence;
pub mod slot;

pub use fence::{FenceTicket, GpuFence, QueryFence, TimelineFence};
pub use slot::{Frame, FrameSlot};

/// CPU-side access to a texture's contents, used by software encoder
/// backends that map rather than copy on-GPU.
pub trait TexturePixels {
    /// Pixel size as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);

    /// Snapshot of the BGRA8 contents, `width * height * 4` bytes.
    fn pixels(&self) -> Vec<u8>;
}
