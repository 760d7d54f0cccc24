use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Env, Target};
use indicatif::MultiProgress;

/// Stderr that steps around any progress bars being drawn.
pub struct Console {
    bars: Option<MultiProgress>,
}

impl Write for Console {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.bars {
            Some(bars) => bars.suspend(|| io::stderr().write_all(buf))?,
            None => io::stderr().write_all(buf)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Writes everything to `primary` and, while it keeps working, a copy to `copy`.
pub struct Tee<A, B> {
    primary: A,
    copy: Option<B>,
}

impl<A: Write, B: Write> Tee<A, B> {
    pub fn new(primary: A, copy: Option<B>) -> Self {
        Self { primary, copy }
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.primary.write_all(buf)?;
        if let Some(copy) = &mut self.copy
            && copy.write_all(buf).is_err()
        {
            // A full disk should not take the console log down with it.
            self.copy = None;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(copy) = &mut self.copy {
            let _ = copy.flush();
        }
        self.primary.flush()
    }
}

/// Start logging to stderr and to a fresh `log_path` for this run.
///
/// With `bars`, console lines are printed while those progress bars are hidden.
pub fn init(log_path: &Path, bars: Option<MultiProgress>) {
    let file = match File::create(log_path) {
        Ok(mut file) => {
            let _ = writeln!(
                file,
                "starteq {} started {}",
                env!("CARGO_PKG_VERSION"),
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            Some(file)
        }
        Err(err) => {
            eprintln!("log: cannot create {}: {err}", log_path.display());
            None
        }
    };

    Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Pipe(Box::new(Tee::new(Console { bars }, file))))
        .init();
}
