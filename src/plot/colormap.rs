//! Sequential colormaps

use plotters::style::RGBColor;

/// Piecewise-linear colormap over evenly spaced anchor colors
#[derive(Debug, Clone)]
pub struct Colormap {
    anchors: Vec<(u8, u8, u8)>,
}

impl Colormap {
    pub fn new(anchors: Vec<(u8, u8, u8)>) -> Self {
        Self { anchors }
    }

    /// Color at `t` in `[0, 1]`; values outside are clamped and NaN maps to 0
    pub fn at(&self, t: f64) -> RGBColor {
        let n = self.anchors.len();
        if n == 0 {
            return RGBColor(0, 0, 0);
        }
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let scaled = t * (n - 1) as f64;
        let i = (scaled.floor() as usize).min(n.saturating_sub(2));
        if n == 1 {
            let (r, g, b) = self.anchors[0];
            return RGBColor(r, g, b);
        }
        let frac = scaled - i as f64;
        let (a, b) = (self.anchors[i], self.anchors[i + 1]);
        let lerp = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * frac).round() as u8;
        RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
    }

    /// Color of `value` scaled into `[min, max]`
    pub fn scaled(&self, value: f64, min: f64, max: f64) -> RGBColor {
        if max > min {
            self.at((value - min) / (max - min))
        } else {
            self.at(0.5)
        }
    }
}

/// Perceptually uniform dark-purple to mint colormap
pub fn mako() -> Colormap {
    Colormap::new(vec![
        (11, 4, 5),
        (44, 30, 61),
        (62, 53, 107),
        (64, 89, 145),
        (53, 123, 162),
        (54, 157, 173),
        (73, 193, 173),
        (160, 223, 185),
        (222, 245, 229),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_and_clamping() {
        let cmap = mako();
        assert_eq!(cmap.at(0.0), RGBColor(11, 4, 5));
        assert_eq!(cmap.at(1.0), RGBColor(222, 245, 229));
        assert_eq!(cmap.at(-3.0), cmap.at(0.0));
        assert_eq!(cmap.at(7.0), cmap.at(1.0));
        assert_eq!(cmap.at(f64::NAN), cmap.at(0.0));
    }

    #[test]
    fn test_interpolation_brightens() {
        let cmap = mako();
        let brightness = |c: RGBColor| c.0 as u32 + c.1 as u32 + c.2 as u32;
        let mut last = 0;
        for k in 0..=20 {
            let b = brightness(cmap.at(k as f64 / 20.0));
            assert!(b >= last);
            last = b;
        }
        assert_eq!(cmap.scaled(5.0, 0.0, 10.0), cmap.at(0.5));
        assert_eq!(cmap.scaled(3.0, 3.0, 3.0), cmap.at(0.5));
    }
}
