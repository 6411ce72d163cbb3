//! Randomness source (spec C6), grounding: `os_win.c`'s
//! `sqlite3OsRandomSeed`, which asks the host for entropy to seed the
//! pager's own PRNG (used for things like ROWID generation) rather than
//! generating randomness itself.
//!
//! spec.md treats the engine's randomness source as an external
//! collaborator, so `WindowsVfs` takes one as an injected
//! `Box<dyn RandomSource>` rather than owning a CSPRNG. [`OsRandomSource`] is
//! a demo/test adapter, not the only legal implementation.

/// A source of cryptographically-unspecified randomness for seeding and for
/// picking SHARED-lock bytes on legacy hosts ([`crate::variant::HostVariant::Legacy`]).
pub trait RandomSource: Send + Sync {
    /// Fill `buf` with random bytes.
    fn fill(&self, buf: &mut [u8]);
}

/// Demo/test adapter backed by the process' OS entropy source.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn fill(&self, buf: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buf);
    }
}

/// Deterministic adapter for tests that need reproducible temp names or lock
/// byte choices. Public (not `#[cfg(test)]`-gated) so integration tests
/// under `tests/` can use it too.
pub struct FixedSource(pub u8);

impl RandomSource for FixedSource {
    fn fill(&self, buf: &mut [u8]) {
        buf.fill(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_source_fills_whole_buffer() {
        let mut buf = [0u8; 32];
        OsRandomSource.fill(&mut buf);
        assert!(buf.iter().any(|&b| b != 0), "OS RNG returned all zeroes");
    }

    #[test]
    fn fixed_source_is_deterministic() {
        let mut buf = [0u8; 8];
        FixedSource(7).fill(&mut buf);
        assert_eq!(buf, [7; 8]);
    }
}
