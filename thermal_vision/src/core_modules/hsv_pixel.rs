// THEORY (Single-Pixel Color Heuristics):
// The `HsvPixel` is the smallest unit the region extractor reasons about. It holds
// one RGB pixel together with its HSV coordinates. Everything here is computed from
// that one pixel alone; anything involving neighbors lives in the region extractor.
//
// Scale conventions:
// - Hue is stored in half-degrees, 0..180, so a full byte range never overflows.
// - Saturation and value are 0..255.
// These are the 8-bit conventions every threshold table in the classifier is written
// in. Changing the scale here silently shifts every color band, so the conversion is
// pinned by tests against known reference values.
//
// Rounding: hue and saturation round half up (`floor(x + 0.5)`), and negative hues
// wrap by adding 180. Pure red stays at 0 and slightly-magenta red lands at 179,
// which is why the red band is the union of two hue ranges.

pub mod hsv {
    pub type Channel = u8;
    /// Hue in half-degrees, 0..180.
    pub type Hue = u8;
    pub type Saturation = u8;
    pub type Value = u8;
    /// Equal-weight gray level, 0.0..255.0.
    pub type Gray = f64;

    /// One RGB pixel with its 8-bit HSV coordinates precomputed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HsvPixel {
        pub red: Channel,
        pub green: Channel,
        pub blue: Channel,
        pub hue: Hue,
        pub saturation: Saturation,
        pub value: Value,
    }

    impl HsvPixel {
        pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            let (hue, saturation, value) = rgb_to_hsv(red, green, blue);
            Self {
                red,
                green,
                blue,
                hue,
                saturation,
                value,
            }
        }

        pub fn from_rgb(rgb: &image::Rgb<u8>) -> Self {
            let [r, g, b] = rgb.0;
            Self::new(r, g, b)
        }
    }

    /// Mean of the three channels. Used as the intensity term of the confidence
    /// formula.
    pub fn gray_level(rgb: &image::Rgb<u8>) -> Gray {
        let [r, g, b] = rgb.0;
        (r as f64 + g as f64 + b as f64) / 3.0
    }

    /// RGB to 8-bit HSV (H in half-degrees).
    pub fn rgb_to_hsv(red: Channel, green: Channel, blue: Channel) -> (Hue, Saturation, Value) {
        let r = red as f64;
        let g = green as f64;
        let b = blue as f64;

        let maximum_channel = r.max(g).max(b);
        let minimum_channel = r.min(g).min(b);
        let chroma = maximum_channel - minimum_channel;

        let value = maximum_channel as Value;
        let saturation = if maximum_channel <= 0.0 {
            0
        } else {
            round_half_up(255.0 * chroma / maximum_channel) as Saturation
        };

        if chroma <= 0.0 {
            return (0, saturation, value);
        }

        let half_degrees = if maximum_channel == r {
            30.0 * (g - b) / chroma
        } else if maximum_channel == g {
            60.0 + 30.0 * (b - r) / chroma
        } else {
            120.0 + 30.0 * (r - g) / chroma
        };

        let mut hue = round_half_up(half_degrees);
        if hue < 0.0 {
            hue += 180.0;
        }
        (hue as Hue, saturation, value)
    }

    #[inline]
    fn round_half_up(v: f64) -> f64 {
        (v + 0.5).floor()
    }
}
