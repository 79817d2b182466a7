//! PDF region rasterisation via pdfium.
//!
//! The upstream `Pdfium` handle is `!Send`, so each operation binds the
//! library and opens the document afresh (the OS caches the `dlopen`). All
//! pdfium work additionally runs under one process-wide lock: region tasks
//! run on many blocking threads at once and library init/teardown must not
//! interleave.
//!
//! Callers run these methods inside `tokio::task::spawn_blocking`.

use crate::error::{FigDescError, RegionError};
use crate::pipeline::encode::png_bytes;
use crate::pipeline::region::{PageExtent, PageRenderer, RenderRect};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

static PDFIUM_LOCK: Mutex<()> = Mutex::new(());

/// Bind the pdfium library.
///
/// Discovery order:
/// 1. `PDFIUM_LIB_PATH` (path to the library file, or its directory)
/// 2. Alongside the running executable
/// 3. System library search paths
pub fn load_pdfium() -> Result<Pdfium, FigDescError> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        debug!("Loading pdfium from {}", path);
        let bound = if Path::new(&path).is_dir() {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
        } else {
            Pdfium::bind_to_library(&path)
        };
        let bindings =
            bound.map_err(|e| FigDescError::PdfiumBindingFailed(format!("{}: {:?}", path, e)))?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|d| d.to_string_lossy().into_owned()))
    {
        let lib = Pdfium::pdfium_platform_library_name_at_path(&exe_dir);
        if let Ok(bindings) = Pdfium::bind_to_library(lib) {
            debug!("Loaded pdfium next to the executable");
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| FigDescError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// [`PageRenderer`] over a PDF file on disk.
#[derive(Debug, Clone)]
pub struct PdfiumPageRenderer {
    path: PathBuf,
    password: Option<String>,
}

impl PdfiumPageRenderer {
    pub fn new(path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            path: path.into(),
            password,
        }
    }

    fn open<'a>(&'a self, pdfium: &'a Pdfium) -> Result<PdfDocument<'a>, FigDescError> {
        pdfium
            .load_pdf_from_file(&self.path, self.password.as_deref())
            .map_err(|e| {
                let err_str = format!("{:?}", e);
                if err_str.contains("Password") || err_str.contains("password") {
                    if self.password.is_some() {
                        FigDescError::WrongPassword {
                            path: self.path.clone(),
                        }
                    } else {
                        FigDescError::PasswordRequired {
                            path: self.path.clone(),
                        }
                    }
                } else {
                    FigDescError::CorruptPdf {
                        path: self.path.clone(),
                        detail: err_str,
                    }
                }
            })
    }
}

impl PageRenderer for PdfiumPageRenderer {
    fn page_extents(&self) -> Result<Vec<PageExtent>, FigDescError> {
        let _guard = PDFIUM_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let pdfium = load_pdfium()?;
        let document = self.open(&pdfium)?;

        let extents: Vec<PageExtent> = document
            .pages()
            .iter()
            .map(|page| PageExtent {
                width: page.width().value as f64,
                height: page.height().value as f64,
            })
            .collect();
        debug!("{}: {} pages", self.path.display(), extents.len());
        Ok(extents)
    }

    fn render_region(
        &self,
        page_index: usize,
        rect: &RenderRect,
        scale: u32,
    ) -> Result<Vec<u8>, RegionError> {
        let page_number = page_index as u32 + 1;
        let failed = |detail: String| RegionError::RenderFailed {
            page: page_number,
            detail,
        };

        let _guard = PDFIUM_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let pdfium = load_pdfium().map_err(|e| failed(e.to_string()))?;
        let document = self.open(&pdfium).map_err(|e| failed(e.to_string()))?;
        let pages = document.pages();

        let index = u16::try_from(page_index).map_err(|_| RegionError::PageNotFound {
            page: page_number,
            total: pages.len() as usize,
        })?;
        let page = pages.get(index).map_err(|_| RegionError::PageNotFound {
            page: page_number,
            total: pages.len() as usize,
        })?;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale as f32);
        let image = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{:?}", e)))?
            .as_image();

        let s = scale as f64;
        let x = (rect.x0 * s).floor().max(0.0) as u32;
        let y = (rect.y0 * s).floor().max(0.0) as u32;
        let w = ((rect.width() * s).ceil() as u32).min(image.width().saturating_sub(x));
        let h = ((rect.height() * s).ceil() as u32).min(image.height().saturating_sub(y));
        if w == 0 || h == 0 {
            return Err(failed(format!(
                "crop {}x{} at {},{} is outside the {}x{} render",
                w,
                h,
                x,
                y,
                image.width(),
                image.height()
            )));
        }

        let cropped = image.crop_imm(x, y, w, h);
        debug!("Page {}: cropped {}x{} px at {},{}", page_number, w, h, x, y);

        png_bytes(&cropped).map_err(|e| failed(format!("PNG encoding failed: {}", e)))
    }
}
