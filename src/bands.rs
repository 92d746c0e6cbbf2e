//! Band expansion and the shared frequency buffer.
//!
//! `expand` decouples analysis resolution from visual resolution: the raw
//! N-band magnitudes are mirrored and duplicated into an M-band render buffer,
//! producing a symmetric butterfly pattern regardless of spectral content.

use std::sync::Mutex;

/// Expand raw band magnitudes into `render_count` render bands.
///
/// The first `raw.len()` entries are the raw values in reverse order; entries
/// past that wrap forward from the head, modulo `raw.len()`. With
/// `render_count <= raw.len()` only the reversed head is produced.
pub fn expand(raw: &[f32], render_count: usize) -> Vec<f32> {
    if raw.is_empty() {
        return vec![0.0; render_count];
    }

    let n = raw.len();
    (0..render_count)
        .map(|i| {
            if i < n {
                raw[n - 1 - i]
            } else {
                raw[(i - n) % n]
            }
        })
        .collect()
}

/// Latest published render bands, shared between the analysis thread (writer)
/// and the render loop (reader).
///
/// Publishes replace the whole vector under the lock, so a snapshot is always
/// one complete published buffer, never a mix of two.
pub struct FrequencyBuffer {
    bands: Mutex<Vec<f32>>,
}

impl FrequencyBuffer {
    /// Zero-filled buffer of the configured render length.
    pub fn new(len: usize) -> Self {
        Self {
            bands: Mutex::new(vec![0.0; len]),
        }
    }

    /// Atomically replace the buffer contents.
    pub fn publish(&self, bands: Vec<f32>) {
        *self.bands.lock().unwrap() = bands;
    }

    /// The most recent fully-published buffer (zero-filled before the first
    /// publish). May be stale relative to in-flight analysis, never torn.
    pub fn snapshot(&self) -> Vec<f32> {
        self.bands.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.bands.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn expand_mirrors_then_wraps() {
        let raw = [1.0, 2.0, 3.0];
        assert_eq!(expand(&raw, 6), vec![3.0, 2.0, 1.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn expand_shorter_than_raw_is_reversed_head() {
        let raw = [1.0, 2.0, 3.0];
        assert_eq!(expand(&raw, 2), vec![3.0, 2.0]);
    }

    #[test]
    fn expand_wraps_modulo_past_twice_the_length() {
        let raw = [1.0, 2.0];
        // indices 2.. walk the raw values forward, repeating
        assert_eq!(expand(&raw, 7), vec![2.0, 1.0, 1.0, 2.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn expand_empty_raw_yields_zeros() {
        assert_eq!(expand(&[], 4), vec![0.0; 4]);
    }

    proptest! {
        #[test]
        fn expand_index_identity(
            raw in prop::collection::vec(-80.0f32..80.0, 1..32),
            render_count in 0usize..96,
        ) {
            let out = expand(&raw, render_count);
            prop_assert_eq!(out.len(), render_count);
            let n = raw.len();
            for (i, &v) in out.iter().enumerate() {
                let expected = if i < n {
                    raw[n - 1 - i]
                } else {
                    raw[(i - n) % n]
                };
                prop_assert_eq!(v, expected);
            }
        }
    }

    #[test]
    fn snapshot_before_publish_is_zero_filled() {
        let buf = FrequencyBuffer::new(8);
        assert_eq!(buf.snapshot(), vec![0.0; 8]);
    }

    #[test]
    fn publish_replaces_wholesale() {
        let buf = FrequencyBuffer::new(3);
        buf.publish(vec![1.0, 2.0]);
        assert_eq!(buf.snapshot(), vec![1.0, 2.0]);
        buf.publish(vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(buf.snapshot(), vec![4.0, 5.0, 6.0, 7.0]);
    }
}
