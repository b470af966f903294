//! Console presentation of recognized faces.

use facereg_core::{Display, Frame, IdentityKey, Recognition};
use std::io::Write;

/// Prints the recognized identities whenever the set changes.
pub struct ConsoleDisplay<W> {
    out: W,
    last: Vec<IdentityKey>,
}

impl ConsoleDisplay<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleDisplay<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last: Vec::new(),
        }
    }

    fn render(&mut self, frame: &Frame, r: &Recognition) -> std::io::Result<()> {
        let image = match r.image.as_deref().map(image::load_from_memory) {
            Some(Ok(img)) => format!("{}x{}", img.width(), img.height()),
            Some(Err(e)) => {
                tracing::debug!(key = %r.key, error = %e, "enrollment image undecodable");
                "undecodable".to_string()
            }
            None => "none".to_string(),
        };
        writeln!(
            self.out,
            "[frame {}] {} ({}) {} at ({},{})-({},{}) distance={:.3} image={}",
            frame.sequence,
            r.profile.name,
            r.key,
            r.profile.domain,
            r.region.left,
            r.region.top,
            r.region.right,
            r.region.bottom,
            r.distance,
            image,
        )
    }
}

impl<W: Write + Send> Display for ConsoleDisplay<W> {
    fn show(&mut self, frame: &Frame, recognized: &[Recognition]) {
        let mut keys: Vec<IdentityKey> = recognized.iter().map(|r| r.key.clone()).collect();
        keys.sort();
        if keys == self.last {
            return;
        }
        self.last = keys;

        for r in recognized {
            if let Err(e) = self.render(frame, r) {
                tracing::warn!(error = %e, "display write failed");
                return;
            }
        }
    }
}
