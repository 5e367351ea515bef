//! The interactive command loop: reads user text, tokenizes it and
//! translates commands into calls on the engine. All capacity and layout
//! rules live in the `storage` crate; this layer only validates usage.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use storage::{Attrib, FileSystemImage, FsError};

use crate::error::{Result, ShellError};

const MAX_COMMAND_SIZE: usize = 255;
const MAX_NUM_ARGUMENTS: usize = 5;
const PROMPT: &str = "imgfs> ";

enum Flow {
    Continue,
    Quit,
}

/// The image currently open, bound to the host file name it saves to.
struct OpenImage {
    name: String,
    fs: FileSystemImage,
}

pub struct Shell {
    image: Option<OpenImage>,
}

impl Shell {
    pub fn new() -> Self {
        Self { image: None }
    }

    /// Deserialize `name` into a fresh image. The current image is only
    /// replaced once decoding succeeds end to end.
    pub fn open(&mut self, name: &str) -> Result<()> {
        let file = File::open(name).map_err(|_| FsError::NotFound(name.to_string()))?;
        let fs = FileSystemImage::load_from(&mut BufReader::new(file))?;
        self.image = Some(OpenImage {
            name: name.to_string(),
            fs,
        });
        Ok(())
    }

    /// Prompt/read/dispatch until `quit` or end of input.
    pub fn run(&mut self) -> io::Result<()> {
        let mut line = String::new();
        loop {
            print!("{}", PROMPT);
            io::stdout().flush()?;

            line.clear();
            if io::stdin().lock().read_line(&mut line)? == 0 {
                break;
            }
            if line.trim_end().len() > MAX_COMMAND_SIZE {
                println!("imgfs: command too long");
                continue;
            }

            let tokens: Vec<&str> = line.split_whitespace().take(MAX_NUM_ARGUMENTS).collect();
            if tokens.is_empty() {
                continue;
            }
            match self.dispatch(&tokens) {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(err) => println!("{} error: {}", tokens[0], err),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, tokens: &[&str]) -> Result<Flow> {
        let cmd = tokens[0];
        let args = &tokens[1..];
        match cmd {
            "createfs" => {
                let name = required(args, 0, "createfs <image>")?;
                self.image = Some(OpenImage {
                    name: name.to_string(),
                    fs: FileSystemImage::new(),
                });
            }
            "savefs" => self.savefs()?,
            "open" => {
                let name = required(args, 0, "open <image>")?;
                self.open(name)?;
            }
            "close" => {
                if self.image.take().is_none() {
                    return Err(ShellError::NoImageOpen);
                }
            }
            "quit" => return Ok(Flow::Quit),
            "df" => println!("{} bytes free.", self.fs()?.free_bytes()),
            "put" => {
                let path = required(args, 0, "put <file>")?;
                self.fs_mut()?.put(Path::new(path))?;
            }
            "get" => {
                let name = required(args, 0, "get <file> [out]")?;
                let out = args.get(1).copied().unwrap_or(name);
                self.fs()?.get(name, Path::new(out))?;
            }
            "list" => {
                let include_hidden = match args.first() {
                    None => false,
                    Some(&"-h") => true,
                    Some(flag) => {
                        return Err(ShellError::InvalidUsage(format!(
                            "unknown flag {}; usage: list [-h]",
                            flag
                        )))
                    }
                };
                let rows = self.fs()?.list(include_hidden);
                if rows.is_empty() {
                    println!("list: No files found.");
                }
                for row in rows {
                    println!(
                        "{:<8} {} {}",
                        row.size,
                        row.created_at.format("%a %b %e %H:%M:%S %Y"),
                        row.name
                    );
                }
            }
            "attrib" => {
                let flag = required(args, 0, "attrib <+h|-h|+r|-r> <file>")?;
                let name = required(args, 1, "attrib <+h|-h|+r|-r> <file>")?;
                let change = match flag {
                    "+h" => Attrib::Hidden(true),
                    "-h" => Attrib::Hidden(false),
                    "+r" => Attrib::ReadOnly(true),
                    "-r" => Attrib::ReadOnly(false),
                    _ => {
                        return Err(ShellError::InvalidUsage(format!(
                            "unknown flag {}; usage: attrib <+h|-h|+r|-r> <file>",
                            flag
                        )))
                    }
                };
                self.fs_mut()?.set_attrib(name, change)?;
            }
            "del" => {
                let name = required(args, 0, "del <file>")?;
                self.fs_mut()?.delete(name)?;
            }
            _ => {
                return Err(ShellError::InvalidUsage(format!(
                    "unknown command: {}",
                    cmd
                )))
            }
        }
        Ok(Flow::Continue)
    }

    /// Serialize the open image to the file name it is bound to.
    fn savefs(&mut self) -> Result<()> {
        let image = self.image.as_ref().ok_or(ShellError::NoImageOpen)?;
        let mut writer = BufWriter::new(File::create(&image.name)?);
        image.fs.save_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn fs(&self) -> Result<&FileSystemImage> {
        self.image
            .as_ref()
            .map(|open| &open.fs)
            .ok_or(ShellError::NoImageOpen)
    }

    fn fs_mut(&mut self) -> Result<&mut FileSystemImage> {
        self.image
            .as_mut()
            .map(|open| &mut open.fs)
            .ok_or(ShellError::NoImageOpen)
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

fn required<'a>(args: &[&'a str], idx: usize, usage: &str) -> Result<&'a str> {
    args.get(idx)
        .copied()
        .ok_or_else(|| ShellError::InvalidUsage(format!("usage: {}", usage)))
}
