//! Framebuffer plumbing for the pass-driven renderer: the
//! **VarianceTrackingFilm** accumulates each pixel's sample sum and
//! sum of squares so an unbiased variance estimate of the running
//! image is available at every pass boundary, which is what drives
//! the training schedule.
//!
//! Channel layout per pixel:
//! `[weight, r, g, b, a, ...one rgba stripe per AOV..., r2, g2, b2, a2]`.

// others
use smallvec::SmallVec;
// pbrt
use crate::core::gpt::{Float, Spectrum};

// see film.h

/// Firefly mitigation: a single pixel may contribute at most this
/// much to the tile variance.
pub const MAX_PIXEL_VARIANCE: Float = 10_000.0;

/// One radiance sample arriving at a pixel: the main RGBA value plus
/// an RGBA stripe per AOV.
#[derive(Debug, Default, Clone)]
pub struct ShadingResult {
    pub main: [Float; 4],
    pub aovs: SmallVec<[[Float; 4]; 4]>,
}

impl ShadingResult {
    pub fn new(main: [Float; 4]) -> Self {
        ShadingResult {
            main,
            aovs: SmallVec::new(),
        }
    }
}

/// A developed RGBA raster.
#[derive(Debug, Clone)]
pub struct Tile {
    pub width: usize,
    pub height: usize,
    pixels: Vec<[Float; 4]>,
}

impl Tile {
    pub fn new(width: usize, height: usize) -> Self {
        Tile {
            width,
            height,
            pixels: vec![[0.0 as Float; 4]; width * height],
        }
    }
    pub fn set_pixel(&mut self, x: usize, y: usize, color: [Float; 4]) {
        self.pixels[y * self.width + x] = color;
    }
    pub fn get_pixel(&self, x: usize, y: usize) -> [Float; 4] {
        self.pixels[y * self.width + x]
    }
}

/// The AOV rasters developed alongside the main tile.
#[derive(Debug, Clone)]
pub struct TileStack {
    pub tiles: Vec<Tile>,
}

impl TileStack {
    pub fn new(width: usize, height: usize, count: usize) -> Self {
        TileStack {
            tiles: (0..count).map(|_| Tile::new(width, height)).collect(),
        }
    }
    pub fn set_pixel(&mut self, x: usize, y: usize, index: usize, color: [Float; 4]) {
        self.tiles[index].set_pixel(x, y, color);
    }
}

/// The host-visible frame image the pass controller combines into.
#[derive(Debug, Clone)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pixels: Vec<[Float; 4]>,
}

impl Image {
    pub fn new(width: usize, height: usize) -> Self {
        Image {
            width,
            height,
            pixels: vec![[0.0 as Float; 4]; width * height],
        }
    }
    pub fn set_pixel(&mut self, x: usize, y: usize, color: [Float; 4]) {
        self.pixels[y * self.width + x] = color;
    }
    pub fn get_pixel(&self, x: usize, y: usize) -> [Float; 4] {
        self.pixels[y * self.width + x]
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    image: Image,
}

impl Frame {
    pub fn new(width: usize, height: usize) -> Self {
        Frame {
            image: Image::new(width, height),
        }
    }
    pub fn image(&self) -> &Image {
        &self.image
    }
    pub fn image_mut(&mut self) -> &mut Image {
        &mut self.image
    }
}

#[derive(Debug, Clone)]
pub struct VarianceTrackingFilm {
    pub width: usize,
    pub height: usize,
    pub aov_count: usize,
    channel_count: usize,
    pixels: Vec<Float>,
}

impl VarianceTrackingFilm {
    pub fn new(width: usize, height: usize, aov_count: usize) -> Self {
        // weight + main + AOV stripes + squared main
        let channel_count: usize = 1 + 4 + 4 * aov_count + 4;
        VarianceTrackingFilm {
            width,
            height,
            aov_count,
            channel_count,
            pixels: vec![0.0 as Float; width * height * channel_count],
        }
    }
    fn pixel(&self, x: usize, y: usize) -> &[Float] {
        let offset: usize = (y * self.width + x) * self.channel_count;
        &self.pixels[offset..offset + self.channel_count]
    }
    fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [Float] {
        let offset: usize = (y * self.width + x) * self.channel_count;
        &mut self.pixels[offset..offset + self.channel_count]
    }
    pub fn clear(&mut self) {
        for v in self.pixels.iter_mut() {
            *v = 0.0 as Float;
        }
    }
    /// Accumulate one sample with weight 1, including its squared
    /// main value.
    pub fn add(&mut self, x: usize, y: usize, sample: &ShadingResult) {
        assert!(sample.aovs.len() == self.aov_count);
        let channel_count: usize = self.channel_count;
        let pixel: &mut [Float] = self.pixel_mut(x, y);
        pixel[0] += 1.0 as Float;
        for i in 0..4 {
            pixel[1 + i] += sample.main[i];
        }
        for (a, aov) in sample.aovs.iter().enumerate() {
            for i in 0..4 {
                pixel[5 + 4 * a + i] += aov[i];
            }
        }
        for i in 0..4 {
            pixel[channel_count - 4 + i] += sample.main[i] * sample.main[i];
        }
    }
    /// Divide the accumulated sums by the pixel weights, ignoring the
    /// squared-sample stripe.
    pub fn develop_to_tile(&self, tile: &mut Tile, aov_tiles: &mut TileStack) {
        for y in 0..self.height {
            for x in 0..self.width {
                let pixel: &[Float] = self.pixel(x, y);
                let weight: Float = pixel[0];
                let rcp_weight: Float = if weight == 0.0 as Float {
                    0.0 as Float
                } else {
                    1.0 as Float / weight
                };
                tile.set_pixel(
                    x,
                    y,
                    [
                        pixel[1] * rcp_weight,
                        pixel[2] * rcp_weight,
                        pixel[3] * rcp_weight,
                        pixel[4] * rcp_weight,
                    ],
                );
                for a in 0..self.aov_count {
                    aov_tiles.set_pixel(
                        x,
                        y,
                        a,
                        [
                            pixel[5 + 4 * a] * rcp_weight,
                            pixel[5 + 4 * a + 1] * rcp_weight,
                            pixel[5 + 4 * a + 2] * rcp_weight,
                            pixel[5 + 4 * a + 3] * rcp_weight,
                        ],
                    );
                }
            }
        }
    }
    fn pixel_variance(&self, x: usize, y: usize) -> Float {
        let pixel: &[Float] = self.pixel(x, y);
        let weight: Float = pixel[0];
        if weight == 0.0 as Float {
            return 0.0 as Float;
        }
        let squares_offset: usize = self.channel_count - 4;
        let mut v: Spectrum = Spectrum::default();
        for i in 0..3 {
            let sum: Float = pixel[1 + i];
            let square_sum: Float = pixel[squares_offset + i];
            v.c[i] = square_sum - sum * sum / weight;
        }
        v.y().min(MAX_PIXEL_VARIANCE)
    }
    /// Unbiased estimate (up to the firefly clamp) of the summed
    /// per-pixel luminance variance.
    pub fn variance(&self) -> Float {
        let mut tile_variance: Float = 0.0;
        for y in 0..self.height {
            for x in 0..self.width {
                tile_variance += self.pixel_variance(x, y);
            }
        }
        tile_variance
    }
    /// Like `variance`, but also develops the per-pixel values into a
    /// heatmap tile.
    pub fn variance_to_tile(&self, tile: &mut Tile) -> Float {
        let mut tile_variance: Float = 0.0;
        for y in 0..self.height {
            for x in 0..self.width {
                let v: Float = self.pixel_variance(x, y);
                tile.set_pixel(x, y, [v, v, v, 1.0 as Float]);
                tile_variance += v;
            }
        }
        tile_variance
    }
}
