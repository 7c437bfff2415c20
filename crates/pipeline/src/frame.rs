use image::RgbImage;

/// Rational unit of a presentation timestamp, e.g. `1/90000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Convert a timestamp in this unit to seconds. A zero denominator reads
    /// as zero seconds.
    pub fn seconds(self, pts: i64) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        pts as f64 * f64::from(self.num) / f64::from(self.den)
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        // 90 kHz, the usual RTP video clock.
        Self::new(1, 90_000)
    }
}

/// One decoded RGB video frame and its timing.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub image: RgbImage,
    pub pts: i64,
    pub time_base: TimeBase,
}

impl Frame {
    pub fn new(image: RgbImage, pts: i64, time_base: TimeBase) -> Self {
        Self {
            image,
            pts,
            time_base,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn seconds(&self) -> f64 {
        self.time_base.seconds(self.pts)
    }

    /// Same timing, new pixels.
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self {
            image,
            pts: self.pts,
            time_base: self.time_base,
        }
    }
}
