//! Atlas render targets as Bevy `Image` assets, composited on the CPU.

use bevy::asset::RenderAssetUsages;
use bevy::image::ImageSampler;
use bevy::prelude::*;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};
use tiledrape::{AtlasBackend, AtlasCell, GridLayout, Result};

use crate::http_source::{TileImage, TilePixels};

const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];

/// Allocates atlases in `Assets<Image>` and blits tiles into their cells.
pub struct ImageAtlasBackend<'a> {
    images: &'a mut Assets<Image>,
}

impl<'a> ImageAtlasBackend<'a> {
    pub fn new(images: &'a mut Assets<Image>) -> Self {
        Self { images }
    }
}

impl AtlasBackend<TileImage> for ImageAtlasBackend<'_> {
    type Target = Handle<Image>;

    fn create_target(
        &mut self,
        zoom: u8,
        width: u32,
        height: u32,
        _mipmaps: bool,
    ) -> Result<Handle<Image>> {
        let mut image = Image::new_fill(
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            TextureDimension::D2,
            &TRANSPARENT,
            TextureFormat::Rgba8UnormSrgb,
            RenderAssetUsages::default(),
        );
        image.sampler = ImageSampler::linear();
        tracing::debug!("Created {width}x{height} atlas image for zoom {zoom}");
        Ok(self.images.add(image))
    }

    fn release_target(&mut self, target: Handle<Image>) {
        self.images.remove(&target);
    }

    fn composite(
        &mut self,
        target: &mut Handle<Image>,
        layout: &GridLayout,
        cells: &[AtlasCell<TileImage>],
    ) {
        let Some(image) = self.images.get_mut(&*target) else {
            tracing::warn!("Atlas image for zoom {} is gone", layout.zoom);
            return;
        };
        let Some(data) = image.data.as_mut() else {
            return;
        };
        for cell in cells {
            blit_cell(data, layout, cell.index, cell.texture.as_deref());
        }
    }
}

/// Draw `tile` into cell `index` of an RGBA8 atlas, resampling to the cell
/// size with nearest-neighbour filtering. `None` clears the cell.
pub fn blit_cell(data: &mut [u8], layout: &GridLayout, index: usize, tile: Option<&TilePixels>) {
    let size = layout.size as usize;
    let cell = layout.cell_px as usize;
    let stride = size * cell * 4;
    if size == 0 || index >= size * size || data.len() < stride * size * cell {
        return;
    }
    let (cell_x, cell_y) = (index % size, index / size);

    for py in 0..cell {
        let row = (cell_y * cell + py) * stride + cell_x * cell * 4;
        for px in 0..cell {
            let rgba = match tile {
                Some(tile) if tile.width > 0 && tile.height > 0 => {
                    let sx = px * tile.width as usize / cell;
                    let sy = py * tile.height as usize / cell;
                    #[allow(clippy::cast_possible_truncation)]
                    tile.pixel(sx as u32, sy as u32)
                }
                _ => TRANSPARENT,
            };
            let at = row + px * 4;
            data[at..at + 4].copy_from_slice(&rgba);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> GridLayout {
        GridLayout {
            zoom: 10,
            origin_x: 0,
            origin_y: 0,
            size: 2,
            cell_px: 2,
        }
    }

    /// A 4x4 tile whose pixel (x, y) is `[x, y, 7, 255]`.
    fn gradient() -> TilePixels {
        let mut rgba = Vec::new();
        for y in 0..4u8 {
            for x in 0..4u8 {
                rgba.extend_from_slice(&[x, y, 7, 255]);
            }
        }
        TilePixels {
            width: 4,
            height: 4,
            rgba,
        }
    }

    fn atlas_pixel(data: &[u8], x: usize, y: usize) -> [u8; 4] {
        let i = (y * 4 + x) * 4;
        [data[i], data[i + 1], data[i + 2], data[i + 3]]
    }

    #[test]
    fn test_blit_downsamples_into_cell() {
        let mut data = vec![0; 4 * 4 * 4];
        // Cell 3 is the bottom-right one.
        blit_cell(&mut data, &layout(), 3, Some(&gradient()));
        assert_eq!(atlas_pixel(&data, 2, 2), [0, 0, 7, 255]);
        assert_eq!(atlas_pixel(&data, 3, 2), [2, 0, 7, 255]);
        assert_eq!(atlas_pixel(&data, 3, 3), [2, 2, 7, 255]);
        // Other cells untouched.
        assert_eq!(atlas_pixel(&data, 0, 0), TRANSPARENT);
        assert_eq!(atlas_pixel(&data, 1, 3), TRANSPARENT);
    }

    #[test]
    fn test_blit_none_clears_cell() {
        let mut data = vec![9; 4 * 4 * 4];
        blit_cell(&mut data, &layout(), 1, None);
        assert_eq!(atlas_pixel(&data, 2, 0), TRANSPARENT);
        assert_eq!(atlas_pixel(&data, 3, 1), TRANSPARENT);
        assert_eq!(atlas_pixel(&data, 0, 0), [9, 9, 9, 9]);
    }

    #[test]
    fn test_blit_out_of_range_is_ignored() {
        let mut data = vec![5; 4 * 4 * 4];
        blit_cell(&mut data, &layout(), 4, None);
        blit_cell(&mut data[..10], &layout(), 0, None);
        assert!(data.iter().all(|&b| b == 5));
    }
}
