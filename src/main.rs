use clap::{Arg, Command};
use tracing::info;

mod error;
mod shell;

use error::ShellError;
use shell::Shell;

fn main() -> Result<(), ShellError> {
    tracing_subscriber::fmt::init();

    let matches = Command::new("imgfs")
        .version("0.1.0")
        .about("Emulated block storage engine with a flat file system image")
        .arg(
            Arg::new("image")
                .help("File system image to open before the first prompt")
                .required(false),
        )
        .get_matches();

    let mut shell = Shell::new();
    if let Some(image) = matches.get_one::<String>("image") {
        match shell.open(image) {
            Ok(()) => info!("opened image {}", image),
            Err(err) => println!("open error: {}", err),
        }
    }

    shell.run()?;
    Ok(())
}
