use std::time::Instant;

/// Packed RGB24 image, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

const CHANNELS: usize = 3;

impl Frame {
    /// `None` for an empty image, or if `pixels` does not hold exactly `width * height` RGB
    /// triples.
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Option<Self> {
        let valid = width > 0 && height > 0 && pixels.len() == width * height * CHANNELS;
        valid.then_some(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn byte_len(width: usize, height: usize) -> usize {
        width * height * CHANNELS
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * CHANNELS;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    /// The drone's sensor is mounted sideways.
    pub fn rotate_clockwise(&self) -> Self {
        let (width, height) = (self.height, self.width);
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for y in 0..height {
            for x in 0..width {
                // destination (x, y) comes from source column y, counted from the bottom row
                pixels.extend_from_slice(&self.pixel(y, self.height - 1 - x));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Selfie view for the local camera.
    pub fn mirror(&self) -> Self {
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for row in self.pixels.chunks_exact(self.width * CHANNELS) {
            for pixel in row.chunks_exact(CHANNELS).rev() {
                pixels.extend_from_slice(pixel);
            }
        }
        Self {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

/// Hand bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl BBox {
    /// Bounds of landmark points given in normalized `[0, 1]` image coordinates.
    pub fn from_landmarks(
        landmarks: impl IntoIterator<Item = (f32, f32)>,
        width: usize,
        height: usize,
    ) -> Option<Self> {
        let (w, h) = (width as f32, height as f32);
        let mut points = landmarks.into_iter().map(|(x, y)| (x * w, y * h));
        let (x, y) = points.next()?;
        let (x_min, y_min, x_max, y_max) = points.fold((x, y, x, y), |(x0, y0, x1, y1), (x, y)| {
            (x0.min(x), y0.min(y), x1.max(x), y1.max(y))
        });

        Some(Self {
            x_min: x_min as i32,
            y_min: y_min as i32,
            x_max: x_max as i32,
            y_max: y_max as i32,
        })
    }

    pub fn width(&self) -> i32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> i32 {
        self.y_max - self.y_min
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.x_min + self.x_max) / 2, (self.y_min + self.y_max) / 2)
    }
}

/// Exponentially smoothed frames per second.
#[derive(Debug, Clone)]
pub struct FrameRate {
    fps: f64,
    last: Option<Instant>,
}

impl FrameRate {
    const KEEP: f64 = 0.85;
    const MIN_DT: f64 = 1e-6;

    pub fn new() -> Self {
        Self {
            fps: 0.0,
            last: None,
        }
    }

    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last.replace(now) {
            let dt = (now - last).as_secs_f64().max(Self::MIN_DT);
            self.fps = Self::KEEP * self.fps + (1.0 - Self::KEEP) / dt;
        }
        self.fps
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    // pixel value encodes its position as [x, y, 0]
    fn numbered(width: usize, height: usize) -> Frame {
        let pixels = (0..height)
            .flat_map(|y| (0..width).flat_map(move |x| [x as u8, y as u8, 0]))
            .collect();
        Frame::new(width, height, pixels).unwrap()
    }

    #[test]
    fn rejects_wrong_buffer_size() {
        assert!(Frame::new(2, 2, vec![0; 11]).is_none());
        assert!(Frame::new(2, 2, vec![0; 12]).is_some());
    }

    #[test]
    fn rejects_empty_frames() {
        assert!(Frame::new(0, 3, vec![]).is_none());
        assert!(Frame::new(3, 0, vec![]).is_none());
        assert!(Frame::new(0, 0, vec![]).is_none());
    }

    #[test]
    fn rotates_clockwise() {
        let frame = numbered(3, 2);
        let rotated = frame.rotate_clockwise();

        assert_eq!((rotated.width(), rotated.height()), (2, 3));
        // top row of the rotated image is the left column read bottom-up
        assert_eq!(rotated.pixel(0, 0), [0, 1, 0]);
        assert_eq!(rotated.pixel(1, 0), [0, 0, 0]);
        assert_eq!(rotated.pixel(0, 2), [2, 1, 0]);
        assert_eq!(rotated.pixel(1, 2), [2, 0, 0]);

        let full_turn = rotated
            .rotate_clockwise()
            .rotate_clockwise()
            .rotate_clockwise();
        assert_eq!(full_turn, frame);
    }

    #[test]
    fn mirrors_each_row() {
        let frame = numbered(3, 2);
        let mirrored = frame.mirror();

        assert_eq!((mirrored.width(), mirrored.height()), (3, 2));
        assert_eq!(mirrored.pixel(0, 0), [2, 0, 0]);
        assert_eq!(mirrored.pixel(2, 1), [0, 1, 0]);
        assert_eq!(mirrored.mirror(), frame);
    }

    #[test]
    fn bbox_from_normalized_landmarks() {
        let landmarks = [(0.25, 0.5), (0.75, 0.125), (0.5, 0.875)];
        let bbox = BBox::from_landmarks(landmarks, 640, 480).unwrap();

        assert_eq!(
            bbox,
            BBox {
                x_min: 160,
                y_min: 60,
                x_max: 480,
                y_max: 420,
            }
        );
        assert_eq!(bbox.center(), (320, 240));
        assert!(BBox::from_landmarks(Vec::<(f32, f32)>::new(), 640, 480).is_none());
    }

    #[test]
    fn frame_rate_converges() {
        let mut rate = FrameRate::new();
        let start = Instant::now();
        assert_eq!(rate.tick_at(start), 0.0);

        let mut fps = 0.0;
        for i in 1..=100 {
            fps = rate.tick_at(start + Duration::from_millis(40 * i));
        }
        assert!((fps - 25.0).abs() < 0.01, "{fps}");
    }
}
