use std::io::{Cursor, Read};

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, ImageReader};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tracing::{debug, warn};

const SVG_MIME: &str = "image/svg+xml";

/// One-shot image probe. Implementations must never panic or propagate
/// errors; every failure is reported as `false`.
pub trait Preloader: Send + Sync {
    fn preload(&self, url: &str) -> bool;
}

/// The rendering side of an image: fetches what would be displayed and
/// reports what it found, or why it could not be shown.
pub trait ImageDisplay: Send + Sync {
    fn describe(&self, url: &str) -> Result<ImageInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub user_agent: String,
    pub http_client: Option<Client>,
}

pub struct HttpPreloader {
    client: Client,
    user_agent: String,
}

impl HttpPreloader {
    pub fn new(cfg: Config) -> Result<Self> {
        let client = match cfg.http_client {
            Some(client) => client,
            None => Client::builder()
                .timeout(None)
                .build()
                .context("preload: build http client")?,
        };
        let user_agent = if cfg.user_agent.trim().is_empty() {
            format!("hookah-tui/{}", crate::VERSION)
        } else {
            cfg.user_agent
        };
        Ok(Self { client, user_agent })
    }

    fn fetch(&self, url: &str) -> Result<(String, Vec<u8>)> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .context("preload: download")?;

        if !response.status().is_success() {
            return Err(anyhow!("preload: request failed: {}", response.status()));
        }

        let header_mime = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_ascii_lowercase());
        let bytes = response.bytes().context("preload: body")?.to_vec();
        if bytes.is_empty() {
            return Err(anyhow!("preload: empty body"));
        }
        let mime = header_mime
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or_else(|| detect_mime(&bytes));
        Ok((mime, bytes))
    }

    fn inspect(&self, url: &str) -> Result<ImageInfo> {
        let (mime, bytes) = self.fetch(url)?;
        if mime == SVG_MIME {
            return Ok(ImageInfo {
                mime,
                width: 0,
                height: 0,
                size_bytes: bytes.len(),
            });
        }
        let (width, height) = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .context("preload: sniff format")?
            .into_dimensions()
            .context("preload: decode")?;
        // A header that parses is not enough; the body has to decode.
        image::load_from_memory(&bytes).context("preload: decode")?;
        Ok(ImageInfo {
            mime,
            width,
            height,
            size_bytes: bytes.len(),
        })
    }
}

impl Preloader for HttpPreloader {
    fn preload(&self, url: &str) -> bool {
        match self.inspect(url) {
            Ok(info) => {
                debug!(url, mime = %info.mime, "image preloaded");
                true
            }
            Err(err) => {
                warn!(url, error = %format!("{err:#}"), "failed to preload image");
                false
            }
        }
    }
}

impl ImageDisplay for HttpPreloader {
    fn describe(&self, url: &str) -> Result<ImageInfo> {
        self.inspect(url)
    }
}

pub fn detect_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => {
            let mut buffer = [0u8; 512];
            let mut cursor = Cursor::new(bytes);
            let read = cursor.read(&mut buffer).unwrap_or(0);
            let head = String::from_utf8_lossy(&buffer[..read]);
            if head.contains("<svg") {
                return SVG_MIME.into();
            }
            tree_magic_mini::from_u8(&buffer[..read]).to_string()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use std::thread;

    use image::{ImageBuffer, Rgb};
    use tiny_http::{Header, Response, Server};

    pub(crate) fn png_bytes() -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(4, 3, Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Serves `/photo.png`, `/broken.png`, `/logo.svg`; everything else is 404.
    pub(crate) fn start_image_server() -> String {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let png = png_bytes();
        thread::spawn(move || {
            for req in server.incoming_requests() {
                let (status, body, mime): (u16, Vec<u8>, &str) = match req.url() {
                    "/photo.png" => (200, png.clone(), "image/png"),
                    "/broken.png" => (200, b"definitely not a png".to_vec(), "image/png"),
                    "/logo.svg" => (
                        200,
                        br#"<svg xmlns="http://www.w3.org/2000/svg" width="1" height="1"></svg>"#
                            .to_vec(),
                        "image/svg+xml",
                    ),
                    _ => (404, b"missing".to_vec(), "text/plain"),
                };
                let header = Header::from_bytes("Content-Type", mime).unwrap();
                let _ = req.respond(
                    Response::from_data(body)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn resolves_true_for_a_decodable_image() {
        let base = start_image_server();
        let preloader = HttpPreloader::new(Config::default()).unwrap();
        assert!(preloader.preload(&format!("{base}/photo.png")));
        assert!(preloader.preload(&format!("{base}/logo.svg")));
    }

    #[test]
    fn resolves_false_instead_of_failing() {
        let base = start_image_server();
        let preloader = HttpPreloader::new(Config::default()).unwrap();
        assert!(!preloader.preload(&format!("{base}/missing.png")));
        assert!(!preloader.preload(&format!("{base}/broken.png")));
        assert!(!preloader.preload("http://127.0.0.1:9/unreachable.png"));
        assert!(!preloader.preload("not even a url"));
    }

    #[test]
    fn describe_reports_format_and_dimensions() {
        let base = start_image_server();
        let preloader = HttpPreloader::new(Config::default()).unwrap();
        let info = preloader.describe(&format!("{base}/photo.png")).unwrap();
        assert_eq!(info.mime, "image/png");
        assert_eq!((info.width, info.height), (4, 3));
        assert!(preloader.describe(&format!("{base}/broken.png")).is_err());
    }

    #[test]
    fn detect_mime_sniffs_common_formats() {
        assert_eq!(detect_mime(&png_bytes()), "image/png");
        assert_eq!(detect_mime(b"<?xml version=\"1.0\"?><svg></svg>"), SVG_MIME);
    }
}
