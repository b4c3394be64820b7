use circular_buffer::CircularBuffer;

/// Number of samples in one classification window (1 second at 16 kHz).
pub const WINDOW_SAMPLES: usize = 16000;

/// SlidingWindow holds the most recent `N` samples in arrival order.
///
/// The window starts out full of silence, so its length never changes: every
/// push discards as many of the oldest samples as it appends.
pub struct SlidingWindow<const N: usize> {
    samples: Box<CircularBuffer<N, f32>>,
}

impl<const N: usize> SlidingWindow<N> {
    pub fn new() -> Self {
        let mut samples = CircularBuffer::<N, f32>::boxed();
        samples.extend(std::iter::repeat(0f32).take(N));
        Self { samples }
    }

    /// Append a frame of samples. A frame longer than the window only
    /// contributes its last `N` samples.
    pub fn push(&mut self, frame: &[f32]) {
        let tail = &frame[frame.len().saturating_sub(N)..];
        self.samples.extend_from_slice(tail);
    }

    /// Copy out the window contents, oldest sample first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples.to_vec()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl<const N: usize> Default for SlidingWindow<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full_of_silence() {
        let window = SlidingWindow::<8>::new();
        assert_eq!(window.len(), 8);
        assert!(!window.is_empty());
        assert!(window.snapshot().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn keeps_most_recent_samples_in_order() {
        let mut window = SlidingWindow::<6>::new();
        let input: Vec<f32> = (1..=10).map(|x| x as f32).collect();
        for frame in input.chunks(3) {
            window.push(frame);
            assert_eq!(window.len(), 6);
        }
        assert_eq!(window.snapshot(), input[input.len() - 6..].to_vec());
    }

    #[test]
    fn partial_fill_keeps_leading_silence() {
        let mut window = SlidingWindow::<5>::new();
        window.push(&[1.0, 2.0]);
        assert_eq!(window.snapshot(), vec![0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn oversized_frame_is_truncated_from_front() {
        let mut window = SlidingWindow::<4>::new();
        window.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(window.snapshot(), vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn empty_frame_is_a_noop() {
        let mut window = SlidingWindow::<3>::new();
        window.push(&[1.0, 2.0, 3.0]);
        window.push(&[]);
        assert_eq!(window.snapshot(), vec![1.0, 2.0, 3.0]);
        assert_eq!(window.len(), window.snapshot().len());
        assert!(!window.is_empty());
    }

    #[test]
    fn full_size_window_tracks_suffix_of_stream() {
        let mut window = SlidingWindow::<WINDOW_SAMPLES>::new();
        let stream: Vec<f32> = (0..40 * 1024).map(|x| (x % 997) as f32).collect();
        for frame in stream.chunks(1024) {
            window.push(frame);
        }
        assert_eq!(window.len(), WINDOW_SAMPLES);
        assert_eq!(window.snapshot(), stream[stream.len() - WINDOW_SAMPLES..].to_vec());
    }
}
