use std::fmt;

const REDACTED: &str = "****";

/// Holds a sensitive value (gateway server keys, vault passwords, decrypted signing keys) so it can never leak
/// through `Debug` or `Display` formatting. Reading the value is a deliberate, greppable act: [`Secret::reveal`].
#[derive(Clone, Default)]
pub struct Secret<T: Clone + Default> {
    inner: T,
}

impl<T: Clone + Default> Secret<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Access the wrapped value. Audit call sites by searching for `reveal`.
    pub fn reveal(&self) -> &T {
        &self.inner
    }
}

impl<T: Clone + Default> From<T> for Secret<T> {
    fn from(inner: T) -> Self {
        Self::new(inner)
    }
}

impl<T: Clone + Default> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T: Clone + Default> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formatting_never_exposes_the_value() {
        let secret = Secret::new("hunter2".to_string());
        assert_eq!(format!("{secret}"), REDACTED);
        assert_eq!(format!("{secret:?}"), REDACTED);
        assert_eq!(format!("wrapped: {secret:?}"), "wrapped: ****");
        assert_eq!(secret.reveal().as_str(), "hunter2");
    }

    #[test]
    fn from_impl_wraps() {
        let secret: Secret<String> = "key-material".to_string().into();
        assert_eq!(secret.reveal().as_str(), "key-material");
    }
}
