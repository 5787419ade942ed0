/// Point `python` / `pip` invocations at the configured interpreter.
///
/// Only the first occurrence of the literal is rewritten and no shell lexing
/// is attempted: `python` becomes the interpreter, otherwise `pip` becomes
/// `<interpreter> -m pip`. Commands mentioning neither pass through unchanged,
/// and so do commands that already name the interpreter, as a word of its own
/// (`/usr/bin/python3 test.py`) or at the spot that would be rewritten.
pub fn clean_command(command: &str, interpreter: &str) -> String {
    if names_interpreter(command, interpreter) {
        return command.to_string();
    }
    if let Some(pos) = command.find("python") {
        if interpreter.starts_with("python") && command[pos..].starts_with(interpreter) {
            return command.to_string();
        }
        command.replacen("python", interpreter, 1)
    } else if let Some(pos) = command.find("pip") {
        if command[..pos].ends_with(&format!("{interpreter} -m ")) {
            return command.to_string();
        }
        format!(
            "{}{} -m pip{}",
            &command[..pos],
            interpreter,
            &command[pos + "pip".len()..]
        )
    } else {
        command.to_string()
    }
}

fn names_interpreter(command: &str, interpreter: &str) -> bool {
    !interpreter.is_empty()
        && command
            .split(|c: char| c.is_whitespace() || matches!(c, ';' | '&' | '|' | '(' | ')'))
            .any(|word| word == interpreter)
}

/// Quote `s` for safe interpolation into a POSIX shell command line.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
