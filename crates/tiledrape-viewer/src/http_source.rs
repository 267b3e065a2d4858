//! Raster tile source over HTTP.
//!
//! Tiles are fetched from a `{z}/{x}/{y}` URL template, decoded to RGBA8 on
//! the async runtime and kept in the engine's [`PinnedCache`].

use std::sync::Arc;

use bevy::prelude::*;
use tiledrape::{Error, PinnedCache, Result, TileFuture, TileKey, TileSource};

/// Unpinned tiles kept around for quick revisits.
const CACHE_CAPACITY: usize = 512;

/// Sent with every native request; public tile servers reject anonymous clients.
#[cfg(not(target_family = "wasm"))]
const USER_AGENT: &str = concat!("tiledrape-viewer/", env!("CARGO_PKG_VERSION"));

/// Decoded tile pixels.
#[derive(Debug)]
pub struct TilePixels {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8.
    pub rgba: Vec<u8>,
}

impl TilePixels {
    /// RGBA of the pixel at `(x, y)`.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.rgba[i],
            self.rgba[i + 1],
            self.rgba[i + 2],
            self.rgba[i + 3],
        ]
    }
}

/// Shared handle to a decoded tile.
pub type TileImage = Arc<TilePixels>;

/// Fetches tiles from an HTTP tile server.
#[derive(Resource, Clone)]
pub struct HttpTileSource {
    http: reqwest::Client,
    url_template: Arc<str>,
    cache: PinnedCache<TileImage>,
}

impl HttpTileSource {
    #[must_use]
    pub fn new(url_template: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url_template: Arc::from(url_template),
            cache: PinnedCache::new(CACHE_CAPACITY),
        }
    }

    #[must_use]
    pub fn url_for(&self, key: TileKey) -> String {
        expand_template(&self.url_template, key)
    }

    #[must_use]
    pub fn cache(&self) -> &PinnedCache<TileImage> {
        &self.cache
    }
}

/// Substitute `{z}`, `{x}` and `{y}` in a URL template.
#[must_use]
pub fn expand_template(template: &str, key: TileKey) -> String {
    template
        .replace("{z}", &key.zoom.to_string())
        .replace("{x}", &key.x.to_string())
        .replace("{y}", &key.y.to_string())
}

/// Decode a PNG or JPEG payload to RGBA8.
pub fn decode_tile(key: TileKey, bytes: &[u8]) -> Result<TilePixels> {
    let image = image::load_from_memory(bytes).map_err(|e| Error::Decode {
        key,
        message: e.to_string(),
    })?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(TilePixels {
        width,
        height,
        rgba: rgba.into_raw(),
    })
}

impl TileSource for HttpTileSource {
    type Texture = TileImage;

    fn fetch(&self, key: TileKey) -> TileFuture<TileImage> {
        if let Some(tile) = self.cache.get(key) {
            return Box::pin(async move { Ok(tile) });
        }

        let http = self.http.clone();
        let url = self.url_for(key);
        let cache = self.cache.clone();
        Box::pin(async move {
            tracing::debug!(url, "fetching tile");

            let request = http.get(&url);
            #[cfg(not(target_family = "wasm"))]
            let request = request.header(reqwest::header::USER_AGENT, USER_AGENT);

            let response = request.send().await.map_err(|e| Error::Fetch {
                key,
                message: e.to_string(),
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::Fetch {
                    key,
                    message: format!("HTTP {}", status.as_u16()),
                });
            }
            let bytes = response.bytes().await.map_err(|e| Error::Fetch {
                key,
                message: e.to_string(),
            })?;

            let tile = Arc::new(decode_tile(key, &bytes)?);
            cache.insert(key, Arc::clone(&tile));
            Ok(tile)
        })
    }

    fn pin(&self, key: TileKey) {
        self.cache.pin(key);
    }

    fn unpin(&self, key: TileKey) {
        if let Err(e) = self.cache.unpin(key) {
            tracing::warn!("{e}");
        }
    }

    fn resident(&self, key: TileKey) -> Option<TileImage> {
        self.cache.get(key)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tiledrape::SchemeId;

    use super::*;

    fn key() -> TileKey {
        TileKey::new(SchemeId::DEFAULT, 12, 2200, 1343)
    }

    #[test]
    fn test_expand_template() {
        assert_eq!(
            expand_template("https://tiles.example/{z}/{x}/{y}.png", key()),
            "https://tiles.example/12/2200/1343.png"
        );
        // Placeholders may repeat or be reordered.
        assert_eq!(expand_template("{y}-{x}-{z}-{z}", key()), "1343-2200-12-12");
    }

    #[test]
    fn test_decode_png_to_rgba() {
        let mut png = Vec::new();
        let mut source = image::RgbImage::new(3, 2);
        source.put_pixel(2, 1, image::Rgb([10, 20, 30]));
        source
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let tile = decode_tile(key(), &png).unwrap();
        assert_eq!((tile.width, tile.height), (3, 2));
        assert_eq!(tile.rgba.len(), 3 * 2 * 4);
        assert_eq!(tile.pixel(2, 1), [10, 20, 30, 255]);
        assert_eq!(tile.pixel(0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = decode_tile(key(), b"<html>not found</html>").unwrap_err();
        assert!(matches!(err, Error::Decode { key: k, .. } if k == key()));
    }

    #[test]
    fn test_resident_follows_cache() {
        let source = HttpTileSource::new("http://localhost/{z}/{x}/{y}.png");
        assert!(source.resident(key()).is_none());
        source.pin(key());
        source.cache().insert(
            key(),
            Arc::new(TilePixels {
                width: 1,
                height: 1,
                rgba: vec![1, 2, 3, 4],
            }),
        );
        assert_eq!(source.resident(key()).unwrap().pixel(0, 0), [1, 2, 3, 4]);
        source.unpin(key());
        assert_eq!(source.cache().pin_count(key()), 0);
    }
}
