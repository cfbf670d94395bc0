//! Synthetic page generators for drift tests

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::imaging::PageImage;

/// Seeded generator so fixtures are reproducible
pub(crate) fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

const TEXT_LINES: usize = 6;

/// A white page with up to six dark "text lines" of random darkness
///
/// Every page is affine in the six darkness values, so pages drawn from this
/// generator share a low-dimensional manifold.
pub(crate) fn document_page(rng: &mut StdRng, size: usize) -> PageImage {
    let mut pixels = Array2::from_elem((size, size), 255u8);
    let line_height = size / (TEXT_LINES * 2 + 1);
    let (left, right) = (size / 4, size * 3 / 4);

    for line in 0..TEXT_LINES {
        let darkness = if rng.random_range(0..10) < 7 {
            rng.random_range(60..220u8)
        } else {
            0
        };
        let top = (2 * line + 1) * line_height;
        for y in top..top + line_height {
            for x in left..right {
                pixels[[y, x]] = 255 - darkness;
            }
        }
    }

    PageImage::from_gray(pixels).unwrap()
}

pub(crate) fn reference_pages(rng: &mut StdRng, count: usize, size: usize) -> Vec<PageImage> {
    (0..count).map(|_| document_page(rng, size)).collect()
}

pub(crate) fn noise_page(rng: &mut StdRng, size: usize) -> PageImage {
    let pixels = Array2::from_shape_fn((size, size), |_| rng.random_range(0..=255u8));
    PageImage::from_gray(pixels).unwrap()
}

pub(crate) fn black_page(size: usize) -> PageImage {
    PageImage::from_gray(Array2::zeros((size, size))).unwrap()
}
