#![allow(non_snake_case)]

mod app;

use rustyline::{error::ReadlineError, DefaultEditor};
use std::sync::atomic::Ordering;
use crate::app::VecvmCliApp;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut vecvmCliApp = VecvmCliApp::new()?;

    let mut rustyLineEditor = DefaultEditor::new()?;

    let Some(homeDirPath) = dirs::home_dir() else {
        anyhow::bail!("Could not determine home directory");
    };

    let historyFile = homeDirPath.join(".vecvm_history");
    if historyFile.exists() {
        rustyLineEditor.load_history(historyFile.as_path())?;
    }

    if let Some(path) = std::env::args().nth(1) {
        if let Err(e) = vecvmCliApp.processInputLine(&format!(".load {}", path), &mut rustyLineEditor) {
            eprintln!("{}", e);
        }
    }

    loop {
        match rustyLineEditor.readline(&vecvmCliApp.prompt) {
            Ok(line) => match vecvmCliApp.processInputLine(line.trim(), &mut rustyLineEditor) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => eprintln!("{}", e),
            },
            Err(ReadlineError::Interrupted) => {
                // At prompt, increment interrupt count
                if vecvmCliApp.interrupt_count.fetch_add(1, Ordering::SeqCst) >= 1 {
                    eprintln!("Interrupted. Exiting...");
                    break;
                }

                println!("Use .quit to exit or press Ctrl-C again to force quit.");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => anyhow::bail!(err),
        }
    }

    rustyLineEditor.save_history(historyFile.as_path())?;

    Ok(())
}
