//! Logging setup
//!
//! Every log line goes through a writer that masks Telegram bot tokens, so
//! request URLs in teloxide errors never leak the token.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::{prelude::*, EnvFilter};

const TOKEN_MASK: &str = "[TELEGRAM_TOKEN]";

/// Patterns for secrets that must not reach the logs
pub struct RedactionPatterns {
    token_url: Regex,
    token_bare: Regex,
    token_prefixed: Regex,
}

impl RedactionPatterns {
    /// Compile all patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token_prefixed: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    /// Mask every secret found in `input`
    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        let output = self
            .token_url
            .replace_all(input, format!("${{1}}{TOKEN_MASK}${{3}}"));
        let output = self.token_bare.replace_all(&output, TOKEN_MASK);
        self.token_prefixed
            .replace_all(&output, format!("${{1}}{TOKEN_MASK}"))
            .into_owned()
    }
}

/// Writer that redacts each buffer before passing it on
pub struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    /// Wrap `inner`
    pub const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // The caller's buffer was consumed even if the redacted length differs
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` producing [`RedactingWriter`]s
pub struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    /// Wrap a writer factory such as `io::stderr`
    pub const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

/// Install the global subscriber writing redacted logs to stderr.
///
/// `RUST_LOG` wins when set; otherwise `DEBUG_MODE=true|1` selects `debug`
/// and the default is `info` for this crate with noisy dependencies quieted.
///
/// # Errors
///
/// Returns an error if the redaction patterns fail to compile.
pub fn init_logging() -> Result<(), regex::Error> {
    let patterns = Arc::new(RedactionPatterns::new()?);
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(
                "tg_reminder_bot=info,teloxide=info,hyper=warn,reqwest=warn,tokio=warn",
            )
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
    Ok(())
}
