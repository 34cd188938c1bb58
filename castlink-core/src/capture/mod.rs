//! Host-side capture pipeline.
//!
//! | Module    | Purpose                                         |
//! |-----------|-------------------------------------------------|
//! | `grabber` | Screen grabber contract and raw image type       |
//! | `encoder` | BGRA → downsampled JPEG encoding                 |
//! | `service` | The timer-driven capture loop with single-flight |

pub mod encoder;
pub mod grabber;
pub mod service;

pub use encoder::{EncodedImage, FrameEncoder};
pub use grabber::{CaptureInfo, RawImage, ScreenGrabber};
pub use service::{CaptureEvent, CaptureLoop};
