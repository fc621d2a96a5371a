pub mod filter;
pub mod modem;
pub mod scan;
pub mod source;
pub mod util;

pub trait GetSampleRate {
    fn sample_rate(&self) -> f64;
}

impl<T: GetSampleRate> GetSampleRate for &T {
    #[inline]
    fn sample_rate(&self) -> f64 {
        (&**self).sample_rate()
    }
}

impl<T: GetSampleRate> GetSampleRate for &mut T {
    #[inline]
    fn sample_rate(&self) -> f64 {
        (&**self).sample_rate()
    }
}
