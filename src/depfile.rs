//! Parsing of make-style dependency lists, as printed by `cc -M`.

#[derive(Debug, PartialEq, Eq)]
pub struct Deps {
    pub targets: Vec<String>,
    pub deps: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {0}: expected ':' after targets")]
    MissingColon(usize),
    #[error("line {0}: invalid backslash escape")]
    BadEscape(usize),
}

/// Split a logical line into whitespace-separated words, honoring `\ ` and
/// `\#` escapes.
fn words(line: &str, lineno: usize) -> Result<Vec<String>, ParseError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(c @ (' ' | '#' | '\\')) => word.push(c),
                Some(c) => {
                    // A backslash in a path, as on Windows.
                    word.push('\\');
                    word.push(c);
                }
                None => return Err(ParseError::BadEscape(lineno)),
            },
            ' ' | '\t' => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            _ => word.push(c),
        }
    }
    if !word.is_empty() {
        words.push(word);
    }
    Ok(words)
}

/// Parse the text of a depfile.  Rules may span lines via trailing
/// backslashes; several rules accumulate into one list, without duplicates.
pub fn parse(text: &str) -> Result<Deps, ParseError> {
    let mut result = Deps {
        targets: Vec::new(),
        deps: Vec::new(),
    };

    let mut logical = String::new();
    let mut start_line = 1;
    for (i, line) in text.lines().enumerate() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if logical.is_empty() {
            start_line = i + 1;
        }
        match line.strip_suffix('\\') {
            Some(rest) if !rest.ends_with('\\') => {
                logical.push_str(rest);
                logical.push(' ');
                continue;
            }
            _ => logical.push_str(line),
        }
        parse_rule(&std::mem::take(&mut logical), start_line, &mut result)?;
    }
    if !logical.is_empty() {
        parse_rule(&logical, start_line, &mut result)?;
    }
    Ok(result)
}

fn parse_rule(rule: &str, lineno: usize, result: &mut Deps) -> Result<(), ParseError> {
    if rule.trim().is_empty() {
        return Ok(());
    }
    // The separating colon is followed by whitespace or the end of the line,
    // which keeps "C:\foo" intact.
    let colon = rule
        .char_indices()
        .find(|&(i, c)| {
            c == ':' && rule[i + 1..].chars().next().map_or(true, char::is_whitespace)
        })
        .map(|(i, _)| i)
        .ok_or(ParseError::MissingColon(lineno))?;
    for target in words(&rule[..colon], lineno)? {
        if !result.targets.contains(&target) {
            result.targets.push(target);
        }
    }
    for dep in words(&rule[colon + 1..], lineno)? {
        if !result.deps.contains(&dep) {
            result.deps.push(dep);
        }
    }
    Ok(())
}
