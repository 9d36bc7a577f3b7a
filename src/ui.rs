// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! User-facing prompts and notices.

use crate::error::{Error, Result};
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Everything certin asks of, or tells, the person at the keyboard.
pub trait UserInterface: Send + Sync {
    /// Explain why a sudo password is about to be requested.
    fn password_request_notice(&self, reason: &str);

    fn close_firefox_before_continuing(&self);

    /// Tell the user the manual Firefox flow is starting and wait for them.
    fn start_firefox_wizard(&self, certificate_host: &str) -> Result<()>;

    /// HTML served for every wizard path other than `/certificate`.
    fn firefox_wizard_prompt_page(&self, certificate_url: &str) -> String {
        format!(
            "<html>\n  <head>\n    <meta http-equiv=\"refresh\" content=\"0; url={}\" />\n  </head>\n</html>\n",
            certificate_url
        )
    }

    /// Block until the user has finished the Firefox wizard.
    fn wait_for_firefox_wizard(&self) -> Result<()>;

    fn warn_chrome_on_linux_without_certutil(&self);

    /// Password protecting the CA key on Windows. Asked again after a failed decrypt.
    fn windows_encryption_password(&self) -> Result<String>;

    /// Ask whether an existing output file may be replaced.
    fn confirm_overwrite(&self, path: &Path) -> bool;

    fn log(&self, message: &str);

    fn warn(&self, message: &str);
}

/// Terminal implementation: stdout for progress, stderr for warnings.
pub struct TerminalUi {
    silent: bool,
}

impl TerminalUi {
    pub fn new(silent: bool) -> Self {
        Self { silent }
    }
}

impl UserInterface for TerminalUi {
    fn password_request_notice(&self, reason: &str) {
        eprintln!("Your permission is required.");
        eprintln!("  Reason: {}", reason);
        eprintln!("  Please enter your machine (sudo) password if you wish to proceed");
    }

    fn close_firefox_before_continuing(&self) {
        println!("Please close Firefox before continuing");
    }

    fn start_firefox_wizard(&self, certificate_host: &str) -> Result<()> {
        println!(
            "
  certin was unable to automatically configure Firefox. You'll need to
  complete this process manually. Firefox will walk you through it.

  When you're ready, press Enter to continue. Firefox will launch and
  display a wizard to walk you through trusting the certin certificate.
  When you are finished, come back here and we'll finish up.

  (If Firefox doesn't start, start it yourself and open
  {} in a new tab.)

  <Press Enter to launch the Firefox wizard>",
            certificate_host
        );
        wait_for_enter()
    }

    fn wait_for_firefox_wizard(&self) -> Result<()> {
        println!(
            "
  Launching Firefox ...

  Once you've finished the Firefox wizard for adding the certificate,
  press Enter here again and we'll wrap up.

  <Press Enter to continue>"
        );
        wait_for_enter()
    }

    fn warn_chrome_on_linux_without_certutil(&self) {
        eprintln!(
            "Warning: It looks like you have Chrome installed, but certutil installation is \
             disabled.\nWithout certutil Chrome cannot be told to trust certin certificates. \
             They will work, but Chrome will keep warning that they are untrusted."
        );
    }

    fn windows_encryption_password(&self) -> Result<String> {
        let password = rpassword::prompt_password(
            "certin password (protects the local CA key on this machine): ",
        )
        .map_err(|e| Error::Config(format!("Failed to read password: {}", e)))?;

        if password.is_empty() {
            return Err(Error::Config("Password cannot be empty".to_string()));
        }
        Ok(password)
    }

    fn confirm_overwrite(&self, path: &Path) -> bool {
        confirm_prompt(&format!("Would you like to overwrite {}?", path.display()))
    }

    fn log(&self, message: &str) {
        if !self.silent {
            println!("{}", message);
        }
    }

    fn warn(&self, message: &str) {
        eprintln!("Warning: {}", message);
    }
}

/// Display a confirmation prompt and return true if user confirms with 'y' or 'yes'
pub fn confirm_prompt(message: &str) -> bool {
    print!("{} [y/N] ", message);
    io::stdout().flush().ok();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    let input = input.trim().to_lowercase();
    input == "y" || input == "yes"
}

fn wait_for_enter() -> Result<()> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| Error::Wizard(format!("Failed to read from terminal: {}", e)))?;
    Ok(())
}
