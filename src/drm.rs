//! Display driver: KMS mode-setting and dumb-buffer scan-out.
//!
//! Owns the scan-out pipeline end to end: picks the first usable DRM node,
//! binds the first connected connector to a CRTC in its native mode, and
//! paints through a CPU-side shadow buffer that is bulk-copied into the
//! kernel dumb buffer on [`Display::commit`]. The CRTC configuration found at
//! startup is saved verbatim and reinstalled on drop, so the console is left
//! exactly as we found it.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use drm::buffer::{Buffer, DrmFourcc};
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{connector, crtc, framebuffer, Device as ControlDevice};
use drm::Device;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DrmError {
    #[error("no KMS device with connectors and CRTCs found")]
    NoDevice,

    #[error("no connected monitor")]
    NoMonitor,

    #[error("no CRTC available")]
    NoCrtc,

    #[error("dumb buffer allocation failed: {0}")]
    CreateBuffer(#[source] std::io::Error),

    #[error("framebuffer object rejected: {0}")]
    AddFramebuffer(#[source] std::io::Error),

    #[error("scan-out mapping failed: {0}")]
    Map(#[source] std::io::Error),

    #[error("mode install failed: {0}")]
    SetCrtc(#[source] std::io::Error),
}

/// An open DRM device node.
pub struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl Device for Card {}
impl ControlDevice for Card {}

/// The scan-out surface.
///
/// Geometry is immutable after initialisation. All rendering goes into
/// `shadow`; a frame reaches the screen only through [`Display::commit`].
pub struct Display {
    card: Card,
    width: u32,
    height: u32,
    stride: u32,
    shadow: Vec<u8>,
    bo: Option<DumbBuffer>,
    fb: Option<framebuffer::Handle>,
    conn: connector::Handle,
    crtc: crtc::Handle,
    saved: Option<crtc::Info>,
}

impl Display {
    /// Probe `/dev/dri/card*`, pick a connected monitor, and take over its
    /// CRTC with a freshly allocated XR24 dumb buffer in the native mode.
    pub fn open() -> Result<Self, DrmError> {
        let (card, res) = first_card()?;

        let mut picked: Option<connector::Info> = None;
        for handle in res.connectors() {
            if let Ok(info) = card.get_connector(*handle, false) {
                if info.state() == connector::State::Connected && !info.modes().is_empty() {
                    picked = Some(info);
                    break;
                }
            }
        }
        let conn = picked.ok_or(DrmError::NoMonitor)?;
        let mode = conn.modes()[0];
        let (width, height) = (mode.size().0 as u32, mode.size().1 as u32);
        info!("resolution: {width}x{height}");

        // Prefer the CRTC already wired to the connector's encoder.
        let mut crtc_handle = conn
            .current_encoder()
            .and_then(|enc| card.get_encoder(enc).ok())
            .and_then(|enc| enc.crtc());
        if crtc_handle.is_none() {
            crtc_handle = res.crtcs().first().copied();
        }
        let crtc_handle = crtc_handle.ok_or(DrmError::NoCrtc)?;

        let saved = card.get_crtc(crtc_handle).ok();

        let mut bo = card
            .create_dumb_buffer((width, height), DrmFourcc::Xrgb8888, 32)
            .map_err(DrmError::CreateBuffer)?;
        let stride = bo.pitch();

        let fb = match card.add_framebuffer(&bo, 24, 32) {
            Ok(fb) => fb,
            Err(e) => {
                let _ = card.destroy_dumb_buffer(bo);
                return Err(DrmError::AddFramebuffer(e));
            }
        };

        // Validate the mapping up front; a device that cannot map its own
        // dumb buffer is unusable.
        let map_result = card.map_dumb_buffer(&mut bo).map(|map| map.len());
        let size = match map_result {
            Ok(size) => size,
            Err(e) => {
                let _ = card.destroy_framebuffer(fb);
                let _ = card.destroy_dumb_buffer(bo);
                return Err(DrmError::Map(e));
            }
        };

        if let Err(e) = card.set_crtc(crtc_handle, Some(fb), (0, 0), &[conn.handle()], Some(mode))
        {
            let _ = card.destroy_framebuffer(fb);
            let _ = card.destroy_dumb_buffer(bo);
            return Err(DrmError::SetCrtc(e));
        }

        info!("DRM initialized (stride={stride})");
        Ok(Self {
            card,
            width,
            height,
            stride,
            shadow: vec![0u8; size],
            bo: Some(bo),
            fb: Some(fb),
            conn: conn.handle(),
            crtc: crtc_handle,
            saved,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per scan-out row; may exceed `width * 4`.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// The shadow buffer all rendering writes into.
    pub fn shadow_mut(&mut self) -> &mut [u8] {
        &mut self.shadow
    }

    /// Raw device fd, needed by the console arbiter's signal handlers to
    /// toggle master rights without touching this struct.
    pub fn raw_fd(&self) -> RawFd {
        self.card.as_fd().as_raw_fd()
    }

    /// Commit the shadow buffer to the scan-out buffer in one bulk copy.
    ///
    /// Not synchronised against scan-out; tearing within one frame is
    /// tolerated.
    pub fn commit(&mut self) {
        let Some(bo) = self.bo.as_mut() else { return };
        match self.card.map_dumb_buffer(bo) {
            Ok(mut map) => {
                let n = map.len().min(self.shadow.len());
                map[..n].copy_from_slice(&self.shadow[..n]);
            }
            Err(e) => warn!("commit: mapping scan-out buffer failed: {e}"),
        }
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = self.card.set_crtc(
                self.crtc,
                saved.framebuffer(),
                saved.position(),
                &[self.conn],
                saved.mode(),
            ) {
                warn!("failed to restore original CRTC: {e}");
            }
        }
        if let Some(fb) = self.fb.take() {
            let _ = self.card.destroy_framebuffer(fb);
        }
        if let Some(bo) = self.bo.take() {
            let _ = self.card.destroy_dumb_buffer(bo);
        }
        info!("display released");
    }
}

fn first_card() -> Result<(Card, drm::control::ResourceHandles), DrmError> {
    for index in 0..64 {
        let path = format!("/dev/dri/card{index}");
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(f) => f,
            Err(_) => continue,
        };
        let card = Card(file);
        let res = match card.resource_handles() {
            Ok(r) => r,
            Err(_) => continue,
        };
        if !res.connectors().is_empty() && !res.crtcs().is_empty() {
            info!(
                "found KMS device: {path} ({} connectors, {} CRTCs)",
                res.connectors().len(),
                res.crtcs().len()
            );
            return Ok((card, res));
        }
    }
    Err(DrmError::NoDevice)
}
