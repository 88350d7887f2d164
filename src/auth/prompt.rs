//! Interactive authorization prompt.

use std::io::{self, BufRead, Write};
use tracing::{debug, warn};
use url::Url;

/// Obtains an authorization code from a human for a given authorization URL.
pub trait CodePrompt {
    /// Show `auth_url` and return whatever the user entered.
    ///
    /// `Ok(None)` means the input was closed before a line was entered.
    fn prompt_code(&mut self, auth_url: &Url) -> io::Result<Option<String>>;
}

/// Prompts on stderr and reads the code from stdin.
#[derive(Debug, Default)]
pub struct ConsolePrompt {
    /// Also try to open the URL in the default browser.
    pub open_browser: bool,
}

impl ConsolePrompt {
    pub fn new(open_browser: bool) -> Self {
        Self { open_browser }
    }
}

impl CodePrompt for ConsolePrompt {
    fn prompt_code(&mut self, auth_url: &Url) -> io::Result<Option<String>> {
        if self.open_browser {
            if let Err(e) = open::that(auth_url.as_str()) {
                warn!("Failed to open browser: {}", e);
            }
        }

        let stdin = io::stdin();
        let mut stderr = io::stderr();
        prompt_with(&mut stdin.lock(), &mut stderr, auth_url)
    }
}

fn prompt_with<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    auth_url: &Url,
) -> io::Result<Option<String>> {
    write!(output, "\n1. Open this page:\n{}\n\n", auth_url)?;
    write!(output, "2. Enter the authorization code shown in the page: ")?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        debug!("Input closed before an authorization code was entered");
        return Ok(None);
    }

    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}
