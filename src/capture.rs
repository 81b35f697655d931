//! Screen region capture.
//!
//! Captures an arbitrary screen pixel rectangle by BitBlt-ing the screen DC
//! into a 32-bit top-down DIB section, then converting BGRA to RGBA. The
//! region is small (an inventory panel) and captured at most once per macro
//! run, so GDI is fast enough and needs no capture session state.

use anyhow::Result;
#[cfg(windows)]
use anyhow::anyhow;
#[cfg(windows)]
use image::Rgba;
use image::RgbaImage;

#[cfg(windows)]
use windows::Win32::Foundation::HANDLE;
#[cfg(windows)]
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleDC, CreateDIBSection, DeleteDC, DeleteObject, GetDC, ReleaseDC,
    SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, SRCCOPY,
};

use crate::grid::Region;

/// Source of region screenshots. The engine treats capture as a pure
/// `region -> bitmap` function.
pub trait CaptureProvider: Send + Sync {
    fn capture(&self, region: &Region) -> Result<RgbaImage>;
}

/// GDI BitBlt capture from the primary screen DC.
#[cfg(windows)]
pub struct GdiCapture;

#[cfg(windows)]
impl CaptureProvider for GdiCapture {
    fn capture(&self, region: &Region) -> Result<RgbaImage> {
        let width = region.width() as i32;
        let height = region.height() as i32;

        unsafe {
            let screen_dc = GetDC(None);
            if screen_dc.is_invalid() {
                return Err(anyhow!("GetDC failed"));
            }

            let mem_dc = CreateCompatibleDC(screen_dc);
            if mem_dc.is_invalid() {
                ReleaseDC(None, screen_dc);
                return Err(anyhow!("CreateCompatibleDC failed"));
            }

            // Top-down 32bpp DIB so rows read in image order with no padding.
            let bmi = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };

            let mut bits: *mut std::ffi::c_void = std::ptr::null_mut();
            let bitmap = match CreateDIBSection(
                mem_dc,
                &bmi,
                DIB_RGB_COLORS,
                &mut bits,
                HANDLE::default(),
                0,
            ) {
                Ok(bitmap) => bitmap,
                Err(e) => {
                    let _ = DeleteDC(mem_dc);
                    ReleaseDC(None, screen_dc);
                    return Err(anyhow!("CreateDIBSection failed: {}", e));
                }
            };

            let old_bitmap = SelectObject(mem_dc, bitmap);
            let blt = BitBlt(
                mem_dc,
                0,
                0,
                width,
                height,
                screen_dc,
                region.start().x,
                region.start().y,
                SRCCOPY,
            );

            let img = if blt.is_ok() && !bits.is_null() {
                let len = (width as usize) * (height as usize) * 4;
                let src = std::slice::from_raw_parts(bits as *const u8, len);
                let mut img = RgbaImage::new(width as u32, height as u32);
                for (i, pixel) in img.pixels_mut().enumerate() {
                    let offset = i * 4;
                    // BGRA -> RGBA
                    let b = src[offset];
                    let g = src[offset + 1];
                    let r = src[offset + 2];
                    *pixel = Rgba([r, g, b, 255]);
                }
                Ok(img)
            } else {
                Err(anyhow!("BitBlt failed"))
            };

            SelectObject(mem_dc, old_bitmap);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            ReleaseDC(None, screen_dc);

            img
        }
    }
}
