/// Fixed-size structures that are copied into and out of page bytes.
pub(crate) trait Serialize {
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Self;
}
