use image::GrayImage;

use crate::modem::fax::line;

/// Receives completed scanlines from the decoder, in row order. Ownership of
/// each row transfers to the sink.
pub trait ScanlineSink {
    fn accept_line(&mut self, row: Vec<u8>);

    /// Called exactly once per image, when reception ends.
    fn image_complete(&mut self) {}
}

impl<F> ScanlineSink for &mut F
where
    F: ScanlineSink,
{
    #[inline]
    fn accept_line(&mut self, row: Vec<u8>) {
        (&mut **self).accept_line(row);
    }

    #[inline]
    fn image_complete(&mut self) {
        (&mut **self).image_complete();
    }
}

impl ScanlineSink for Vec<Vec<u8>> {
    fn accept_line(&mut self, row: Vec<u8>) {
        self.push(row);
    }
}

/// Row-accumulating grayscale raster.
#[derive(Clone, Debug, Default)]
pub struct Raster {
    width: usize,
    rows: Vec<Vec<u8>>,
    complete: bool,
}

impl Raster {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            rows: Vec::new(),
            complete: false,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Applies a constant skew correction to all received rows.
    pub fn translate(&mut self, offset: isize) {
        for row in &mut self.rows {
            line::rotate(row, offset);
        }
    }

    /// Renders the received rows; `None` when no row has arrived yet.
    pub fn to_image(&self) -> Option<GrayImage> {
        if self.rows.is_empty() {
            return None;
        }
        let mut data = Vec::with_capacity(self.width * self.rows.len());
        for row in &self.rows {
            data.extend_from_slice(row);
        }
        GrayImage::from_raw(self.width as u32, self.rows.len() as u32, data)
    }
}

impl ScanlineSink for Raster {
    fn accept_line(&mut self, mut row: Vec<u8>) {
        row.resize(self.width, 0);
        self.rows.push(row);
    }

    fn image_complete(&mut self) {
        self.complete = true;
    }
}

#[cfg(test)]
mod tests {
    use crate::modem::fax::raster::{
        Raster,
        ScanlineSink,
    };

    #[test]
    fn raster_accumulates_rows_and_renders() {
        let mut raster = Raster::new(4);
        raster.accept_line(vec![0, 64, 128, 255]);
        raster.accept_line(vec![255, 128, 64, 0]);
        assert_eq!(raster.height(), 2);
        assert!(!raster.is_complete());

        raster.image_complete();
        assert!(raster.is_complete());

        let image = raster.to_image().unwrap();
        assert_eq!(image.dimensions(), (4, 2));
        assert_eq!(image.get_pixel(1, 0).0, [64]);
        assert_eq!(image.get_pixel(0, 1).0, [255]);
    }

    #[test]
    fn empty_raster_renders_to_none() {
        let raster = Raster::new(1810);
        assert!(raster.to_image().is_none());
    }

    #[test]
    fn translate_rotates_every_row() {
        let mut raster = Raster::new(3);
        raster.accept_line(vec![1, 2, 3]);
        raster.accept_line(vec![4, 5, 6]);
        raster.translate(1);

        let image = raster.to_image().unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [2]);
        assert_eq!(image.get_pixel(0, 1).0, [5]);
    }
}
