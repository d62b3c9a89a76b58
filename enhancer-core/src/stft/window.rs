use std::{
  collections::HashMap,
  fmt,
  sync::{Arc, OnceLock, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowShape {
  Hann,
  Hamming,
  Rectangular,
}

impl fmt::Display for WindowShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WindowShape::Hann => write!(f, "hann"),
      WindowShape::Hamming => write!(f, "hamming"),
      WindowShape::Rectangular => write!(f, "rect"),
    }
  }
}

/// A window shape raised to `power`, e.g. `Hann` with `power = 0.5` is the
/// square-root Hann window used by GTCRN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
  pub shape: WindowShape,
  pub power: f32,
}

impl WindowSpec {
  pub const fn new(shape: WindowShape, power: f32) -> Self {
    Self { shape, power }
  }

  pub const fn hann() -> Self {
    Self::new(WindowShape::Hann, 1.0)
  }

  pub const fn sqrt_hann() -> Self {
    Self::new(WindowShape::Hann, 0.5)
  }
}

impl Default for WindowSpec {
  fn default() -> Self {
    Self::sqrt_hann()
  }
}

// periodic, like `torch.hann_window(n)`
fn generate(length: usize, shape: WindowShape) -> Vec<f32> {
  if length == 0 {
    return Vec::new();
  }

  if length == 1 {
    return vec![1.0];
  }

  let (a0, a1) = match shape {
    WindowShape::Hann => (0.5, 0.5),
    WindowShape::Hamming => (0.54, 0.46),
    WindowShape::Rectangular => return vec![1.0; length],
  };

  let scaling = (std::f64::consts::PI * 2.0) / length as f64;

  let mut res = vec![0.0; length];
  res[0] = (a0 - a1) as f32;

  for i in 1..(length / 2 + 1) {
    let cur = (a0 - a1 * (scaling * i as f64).cos()) as f32;
    res[i] = cur;
    res[length - i] = cur;
  }

  res
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct WindowKey {
  length: usize,
  shape: WindowShape,
  power_bits: u32,
}

/// Precomputed windows keyed by `(length, shape, power)`.
///
/// Windows are immutable once inserted; every transform that asks for the
/// same configuration gets the same allocation.
#[derive(Default)]
pub struct WindowCache {
  windows: RwLock<HashMap<WindowKey, Arc<[f32]>>>,
}

impl WindowCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// The process-wide cache.
  pub fn global() -> &'static WindowCache {
    static CACHE: OnceLock<WindowCache> = OnceLock::new();
    CACHE.get_or_init(WindowCache::new)
  }

  pub fn get(&self, length: usize, spec: WindowSpec) -> Arc<[f32]> {
    let key = WindowKey {
      length,
      shape: spec.shape,
      power_bits: spec.power.to_bits(),
    };

    if let Some(window) = self
      .windows
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(&key)
    {
      return Arc::clone(window);
    }

    let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
    let window = windows.entry(key).or_insert_with(|| {
      tracing::debug!(length, shape = %spec.shape, power = spec.power, "Generating window");

      let mut window = generate(length, spec.shape);
      if spec.power != 1.0 {
        window.iter_mut().for_each(|w| *w = w.powf(spec.power));
      }
      window.into()
    });

    Arc::clone(window)
  }

  pub fn len(&self) -> usize {
    self
      .windows
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drops every cached window. Transforms already holding one keep it alive.
  pub fn clear(&self) {
    self
      .windows
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .clear();
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn hann_is_periodic() {
    let cache = WindowCache::new();
    let w = cache.get(8, WindowSpec::hann());

    assert_eq!(w.len(), 8);
    assert_abs_diff_eq!(w[0], 0.0);
    assert_abs_diff_eq!(w[4], 1.0, epsilon = 1e-7);
    assert_abs_diff_eq!(w[2], 0.5, epsilon = 1e-7);
    for i in 1..8 {
      assert_abs_diff_eq!(w[i], w[8 - i], epsilon = 1e-7);
    }
  }

  #[test]
  fn sqrt_hann_squares_back() {
    let cache = WindowCache::new();
    let hann = cache.get(512, WindowSpec::hann());
    let sqrt = cache.get(512, WindowSpec::sqrt_hann());

    for (a, b) in hann.iter().zip(sqrt.iter()) {
      assert_abs_diff_eq!(*a, b * b, epsilon = 1e-6);
    }
  }

  #[test]
  fn cache_shares_allocations() {
    let cache = WindowCache::new();
    let a = cache.get(256, WindowSpec::sqrt_hann());
    let b = cache.get(256, WindowSpec::sqrt_hann());
    let c = cache.get(256, WindowSpec::hann());

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(cache.len(), 2);

    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(a.len(), 256);
  }

  #[test]
  fn hamming_and_rect() {
    let cache = WindowCache::new();
    let hamming = cache.get(4, WindowSpec::new(WindowShape::Hamming, 1.0));
    assert_abs_diff_eq!(hamming[0], 0.08, epsilon = 1e-6);
    assert_abs_diff_eq!(hamming[2], 1.0, epsilon = 1e-6);

    let rect = cache.get(3, WindowSpec::new(WindowShape::Rectangular, 1.0));
    assert_eq!(&rect[..], &[1.0, 1.0, 1.0]);
  }
}
