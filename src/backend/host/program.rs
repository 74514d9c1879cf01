//! Source checks performed by the host platform's "compiler".
//!
//! The host platform does not compile kernel text. It checks that the text
//! is structurally sound (balanced delimiters, terminated comments and
//! literals) and collects the names of declared kernels, whose bodies are
//! provided as native Rust functions.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelDecl {
    pub name: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Diagnostic {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<program source>:{}: error: {}", self.line, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String, usize),
    Punct(char, usize),
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Scan `source`, returning the declared kernels or every diagnostic found.
pub(crate) fn scan(source: &str) -> Result<Vec<KernelDecl>, Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();
    let mut tokens = Vec::new();
    let mut open: Vec<(char, usize)> = Vec::new();

    let chars: Vec<char> = source.chars().collect();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => {
                            diagnostics.push(Diagnostic {
                                line: start,
                                message: "unterminated comment".into(),
                            });
                            break;
                        }
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some('\n') => {
                            line += 1;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            '"' | '\'' => {
                let start = line;
                i += 1;
                loop {
                    match chars.get(i) {
                        None | Some('\n') => {
                            diagnostics.push(Diagnostic {
                                line: start,
                                message: format!("missing terminating {} character", c),
                            });
                            break;
                        }
                        Some('\\') => i += 2,
                        Some(&q) if q == c => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            '(' | '[' | '{' => {
                open.push((c, line));
                tokens.push(Token::Punct(c, line));
                i += 1;
            }
            ')' | ']' | '}' => {
                match open.pop() {
                    Some((o, _)) if closing(o) == c => {}
                    Some((o, at)) => {
                        diagnostics.push(Diagnostic {
                            line,
                            message: format!(
                                "expected '{}' to match '{}' from line {}, found '{}'",
                                closing(o),
                                o,
                                at,
                                c
                            ),
                        });
                    }
                    None => diagnostics.push(Diagnostic {
                        line,
                        message: format!("unexpected '{}'", c),
                    }),
                }
                tokens.push(Token::Punct(c, line));
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect(), line));
            }
            c if c.is_whitespace() => i += 1,
            c => {
                tokens.push(Token::Punct(c, line));
                i += 1;
            }
        }
    }

    for (o, at) in open {
        diagnostics.push(Diagnostic {
            line: at,
            message: format!("unclosed '{}'", o),
        });
    }

    let kernels = declarations(&tokens, &mut diagnostics);

    if diagnostics.is_empty() {
        Ok(kernels)
    } else {
        diagnostics.sort_by_key(|d| d.line);
        Err(diagnostics)
    }
}

// `__kernel void NAME (` or `kernel void NAME (`
fn declarations(tokens: &[Token], diagnostics: &mut Vec<Diagnostic>) -> Vec<KernelDecl> {
    let mut kernels: Vec<KernelDecl> = Vec::new();

    for window in tokens.windows(4) {
        let (qualifier, ret, name, paren) = (&window[0], &window[1], &window[2], &window[3]);
        let is_kernel = matches!(qualifier, Token::Ident(q, _) if q == "__kernel" || q == "kernel");
        let is_void = matches!(ret, Token::Ident(r, _) if r == "void");
        let opens = matches!(paren, Token::Punct('(', _));

        if let (true, true, true, Token::Ident(name, line)) = (is_kernel, is_void, opens, name) {
            if let Some(previous) = kernels.iter().find(|k| &k.name == name) {
                diagnostics.push(Diagnostic {
                    line: *line,
                    message: format!(
                        "redefinition of kernel '{}' (first defined on line {})",
                        name, previous.line
                    ),
                });
                continue;
            }
            kernels.push(KernelDecl {
                name: name.clone(),
                line: *line,
            });
        }
    }

    kernels
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDER: &str = r#"
// writes one pixel per work item
__kernel void render(__global uchar *out) {
    int x = get_global_id(0);
    int y = get_global_id(1);
    int w = get_global_size(0);
    out[(y * w + x) * 3] = (uchar)((x + y) & 255); /* red } */
    char s[] = "not a brace: }";
}
"#;

    #[test]
    fn test_finds_kernel() {
        let kernels = scan(RENDER).unwrap();
        assert_eq!(kernels.len(), 1);
        assert_eq!(kernels[0].name, "render");
        assert_eq!(kernels[0].line, 3);
    }

    #[test]
    fn test_helpers_are_not_kernels() {
        let src = "float helper(float x) { return x; }\nkernel void a(global uchar *o) {}\n__kernel void b(global uchar *o) {}";
        let names: Vec<_> = scan(src).unwrap().into_iter().map(|k| k.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_unbalanced_brace_reported_with_line() {
        let src = "__kernel void render(__global uchar *out) {\n  out[0] = 1;\n";
        let diags = scan(src).unwrap_err();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, 1);
        assert!(diags[0].to_string().contains("unclosed '{'"));
    }

    #[test]
    fn test_mismatched_delimiter() {
        let src = "__kernel void render(__global uchar *out) {\n  out[0 = 1);\n}";
        let diags = scan(src).unwrap_err();
        assert!(diags.iter().any(|d| d.line == 2 && d.message.contains("expected ']'")));
    }

    #[test]
    fn test_unterminated_comment_and_string() {
        assert!(scan("/* open").is_err());
        assert!(scan("char *s = \"abc;\n").is_err());
    }

    #[test]
    fn test_duplicate_kernel() {
        let src = "kernel void k(global uchar *o) {}\nkernel void k(global uchar *o) {}";
        let diags = scan(src).unwrap_err();
        assert!(diags[0].message.contains("redefinition"));
    }
}
