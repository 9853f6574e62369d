//! # Screen capture
//!
//! Produces [`Frame`]s of a logical screen [`Region`] through the fastest
//! backend that works on this machine.
//!
//! ```text
//! FrameSource::capture(region)
//!   │  region × display scale
//!   ├─► DxgiCapturer   (Desktop Duplication, Windows)
//!   ├─► GdiCapturer    (BitBlt, Windows)
//!   └─► XcapCapturer   (portable pixel grab)
//!          │
//!          ▼
//!   Frame (pooled buffer, returned to BufferPool on drop)
//! ```
//!
//! ## Sub-modules
//!
//! | Module   | Purpose                                          |
//! |----------|--------------------------------------------------|
//! | `types`  | `Region`, `Frame`, `PixelFormat`, `CaptureMethod` |
//! | `pool`   | Shape-bucketed reusable pixel buffers            |
//! | `dxgi`   | DXGI Desktop Duplication backend                 |
//! | `gdi`    | GDI `BitBlt` backend                             |
//! | `grab`   | `xcap` backend                                   |
//! | `dpi`    | Display scale detection                          |
//! | `source` | Ordered fallback chain                           |

pub mod dpi;
pub mod dxgi;
pub mod gdi;
pub mod grab;
pub mod pool;
pub mod source;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use dxgi::DxgiCapturer;
pub use gdi::GdiCapturer;
pub use grab::XcapCapturer;
pub use pool::{Buffer, BufferPool, DEFAULT_POOL_CAP, PoolStats, Shape};
pub use source::{CaptureBackend, FrameCapture, FrameSource, open_backend};
pub use types::{CaptureMethod, Frame, PixelFormat, Region};
