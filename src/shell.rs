use std::io::{self, BufRead, Read, Seek, Write};

use crate::error::Fat32Error;
use crate::volume::Volume;

/// What the interactive loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Continue,
    /// Leave the loop: `exit`/`quit`, or an image that failed the validity
    /// gate.
    Quit,
}

/// Writes the prompt: the current path followed by `>`, no trailing space.
pub fn prompt<T, W: Write>(volume: &Volume<T>, out: &mut W) -> io::Result<()> {
    write!(out, "{}>", volume.current_path())?;
    out.flush()
}

/// Dispatches one input line. The line is tokenized on whitespace; the first
/// field selects the command and the second is its argument, extra fields are
/// ignored. Every result is reported as a fixed short string on `out`.
pub fn process_command<T, W>(volume: &mut Volume<T>, line: &str, out: &mut W) -> io::Result<Signal>
where
    T: Read + Write + Seek,
    W: Write,
{
    let mut fields = line.split_whitespace();
    let Some(command) = fields.next() else {
        return Ok(Signal::Continue);
    };
    let arg = fields.next();

    match command {
        "format" => match volume.format() {
            Ok(()) => writeln!(out, "Ok")?,
            Err(_) => writeln!(out, "Format failed")?,
        },
        "ls" => {
            if volume.is_valid().is_err() {
                writeln!(out, "Unknown disk format")?;
                return Ok(Signal::Quit);
            }
            match volume.ls(arg) {
                Ok(listing) => {
                    for name in listing {
                        writeln!(out, "{name}")?;
                    }
                }
                Err(_) => writeln!(out, "ls failed")?,
            }
        }
        "mkdir" => {
            if volume.is_valid().is_err() {
                writeln!(out, "Unknown disk format")?;
                return Ok(Signal::Quit);
            }
            match arg {
                None => writeln!(out, "Usage: mkdir <name>")?,
                Some(name) => match volume.mkdir(name) {
                    Ok(()) => writeln!(out, "Ok")?,
                    Err(_) => writeln!(out, "mkdir failed")?,
                },
            }
        }
        "touch" => {
            if volume.is_valid().is_err() {
                writeln!(out, "Unknown disk format")?;
                return Ok(Signal::Quit);
            }
            match arg {
                None => writeln!(out, "Usage: touch <name>")?,
                Some(name) => match volume.touch(name) {
                    Ok(()) => writeln!(out, "Ok")?,
                    Err(_) => writeln!(out, "touch failed")?,
                },
            }
        }
        "cd" => {
            if volume.is_valid().is_err() {
                writeln!(out, "Unknown disk format")?;
                return Ok(Signal::Quit);
            }
            match arg {
                None => writeln!(out, "Usage: cd <path>")?,
                Some(path) => match volume.cd(path) {
                    Ok(()) => {}
                    Err(Fat32Error::Unsupported(_)) => {
                        writeln!(out, "Multi-level paths not supported in this version")?;
                        writeln!(out, "cd failed")?;
                    }
                    Err(_) => writeln!(out, "cd failed")?,
                },
            }
        }
        "exit" | "quit" => return Ok(Signal::Quit),
        unknown => writeln!(out, "Unknown command: {unknown}")?,
    }
    Ok(Signal::Continue)
}

/// The interactive loop: prompt, read a line, dispatch; ends on EOF or a
/// [`Signal::Quit`].
pub fn run<T: Read + Write + Seek>(volume: &mut Volume<T>) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        prompt(volume, &mut stdout)?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        if process_command(volume, line.trim_end(), &mut stdout)? == Signal::Quit {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
fn formatted_volume() -> Volume<std::io::Cursor<Vec<u8>>> {
    let mut volume = Volume::from_device(std::io::Cursor::new(vec![0u8; crate::IMAGE_SIZE as usize]));
    volume.format().expect("format failed");
    volume
}

#[cfg(test)]
fn run_line(volume: &mut Volume<std::io::Cursor<Vec<u8>>>, line: &str) -> (String, Signal) {
    let mut out = Vec::new();
    let signal = process_command(volume, line, &mut out).expect("command I/O failed");
    (String::from_utf8(out).expect("output was not UTF-8"), signal)
}

#[test]
fn empty_line_is_a_no_op() {
    let mut volume = formatted_volume();
    let (output, signal) = run_line(&mut volume, "   ");
    assert_eq!(output, "");
    assert_eq!(signal, Signal::Continue);
}

#[test]
fn format_reports_ok() {
    let mut volume = Volume::from_device(std::io::Cursor::new(vec![0u8; crate::IMAGE_SIZE as usize]));
    let (output, signal) = run_line(&mut volume, "format");
    assert_eq!(output, "Ok\n");
    assert_eq!(signal, Signal::Continue);
}

#[test]
fn invalid_image_prints_the_sentinel() {
    let mut volume = Volume::from_device(std::io::Cursor::new(vec![0u8; crate::IMAGE_SIZE as usize]));
    for command in ["ls", "mkdir x", "touch x", "cd /"] {
        let (output, signal) = run_line(&mut volume, command);
        assert!(output.contains("Unknown disk format"), "for {command}");
        assert_eq!(signal, Signal::Quit, "for {command}");
    }
}

#[test]
fn mkdir_and_ls_round_trip() {
    let mut volume = formatted_volume();
    let (output, _) = run_line(&mut volume, "mkdir ttt");
    assert_eq!(output, "Ok\n");

    let (output, _) = run_line(&mut volume, "ls");
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines[..2], [".", ".."]);
    assert!(lines.contains(&"ttt"));

    let (output, _) = run_line(&mut volume, "mkdir ttt");
    assert_eq!(output, "mkdir failed\n");
}

#[test]
fn missing_arguments_print_usage() {
    let mut volume = formatted_volume();
    assert_eq!(run_line(&mut volume, "mkdir").0, "Usage: mkdir <name>\n");
    assert_eq!(run_line(&mut volume, "touch").0, "Usage: touch <name>\n");
    assert_eq!(run_line(&mut volume, "cd").0, "Usage: cd <path>\n");
}

#[test]
fn cd_is_silent_on_success() {
    let mut volume = formatted_volume();
    run_line(&mut volume, "mkdir ttt");

    let (output, signal) = run_line(&mut volume, "cd /ttt");
    assert_eq!(output, "");
    assert_eq!(signal, Signal::Continue);
    assert_eq!(volume.current_path(), "/ttt");

    let (output, _) = run_line(&mut volume, "cd /missing");
    assert_eq!(output, "cd failed\n");
}

#[test]
fn cd_reports_nested_paths_as_unsupported() {
    let mut volume = formatted_volume();
    let (output, _) = run_line(&mut volume, "cd /a/b");
    assert_eq!(
        output,
        "Multi-level paths not supported in this version\ncd failed\n"
    );
}

#[test]
fn unknown_commands_are_echoed() {
    let mut volume = formatted_volume();
    let (output, signal) = run_line(&mut volume, "unknowncmd");
    assert_eq!(output, "Unknown command: unknowncmd\n");
    assert_eq!(signal, Signal::Continue);
}

#[test]
fn exit_and_quit_end_the_loop() {
    let mut volume = formatted_volume();
    assert_eq!(run_line(&mut volume, "exit").1, Signal::Quit);
    assert_eq!(run_line(&mut volume, "quit").1, Signal::Quit);
}

#[test]
fn prompt_shows_the_current_path() {
    let mut volume = formatted_volume();
    run_line(&mut volume, "mkdir ttt");
    run_line(&mut volume, "cd /ttt");

    let mut out = Vec::new();
    prompt(&volume, &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "/ttt>");
}
