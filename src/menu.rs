//! Output compilation: raw plugin stdout to a menu tree.
//!
//! The first horizontal-rule line (`---`, three or more dashes) splits
//! the output into a header segment (status-bar title plus top-level
//! entries) and a body segment (the dropdown contents). Body depth is
//! signaled by a leading run of `--` markers, one unit per nesting
//! level, so the tree is built with an explicit stack rather than
//! recursive descent.

use serde::Serialize;

use crate::line_parser::ParsedLine;
use crate::script_exec::ExecutionResult;

/// Status-bar title shown when a plugin failed or produced nothing.
pub const UNAVAILABLE_TITLE: &str = "\u{26a0}\u{fe0f}";

/// One nesting level in the body segment.
pub const INDENT_MARKER: &str = "--";

lazy_static::lazy_static! {
    /// Horizontal-rule marker: three or more dashes, optionally padded.
    static ref RULE_MARKER: regex::Regex = regex::Regex::new(r"^\s*-{3,}\s*$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Item,
    Separator,
}

/// A node in the compiled menu tree. `line` carries the full directive
/// list so the rendering layer can pick up presentation hints (color,
/// font, icons, unknown keys) without the compiler interpreting them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuNode {
    pub text: String,
    pub kind: NodeKind,
    pub line: ParsedLine,
    /// 1-based line number in the raw output, for diagnostics.
    pub source_line: usize,
    pub children: Vec<MenuNode>,
}

impl MenuNode {
    fn item(line: ParsedLine, source_line: usize) -> MenuNode {
        let text = if line.trim() {
            line.text.trim().to_string()
        } else {
            line.text.clone()
        };
        MenuNode {
            text,
            kind: NodeKind::Item,
            line,
            source_line,
            children: Vec::new(),
        }
    }

    fn separator(source_line: usize) -> MenuNode {
        MenuNode {
            text: String::new(),
            kind: NodeKind::Separator,
            line: ParsedLine::default(),
            source_line,
            children: Vec::new(),
        }
    }
}

/// The compiled output of one plugin cycle. Replaced wholesale on every
/// refresh and published behind an `Arc`, never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuTree {
    /// Status-bar title (first header line).
    pub title: String,
    /// Directives attached to the title line.
    pub title_line: ParsedLine,
    /// Header lines after the first become top-level entries.
    pub header_items: Vec<MenuNode>,
    /// Body segment, nested by indent markers.
    pub body: Vec<MenuNode>,
    /// Sentinel flag: execution failed or produced no output. Distinct
    /// from a successfully parsed tree with an empty body.
    pub unavailable: bool,
}

impl MenuTree {
    /// The fixed placeholder tree shown when a plugin cannot be read.
    pub fn unavailable() -> MenuTree {
        MenuTree {
            title: UNAVAILABLE_TITLE.to_string(),
            title_line: ParsedLine::default(),
            header_items: Vec::new(),
            body: Vec::new(),
            unavailable: true,
        }
    }
}

/// Compile an execution result. Failed or empty executions yield the
/// sentinel unavailable tree; the plugin stays scheduled either way.
pub fn compile(result: &ExecutionResult) -> MenuTree {
    if result.failure.is_some() || result.stdout.trim().is_empty() {
        return MenuTree::unavailable();
    }
    compile_output(&result.stdout)
}

/// Compile raw protocol text. Feeding just the header segment back in
/// produces the same header-derived nodes as the full output.
pub fn compile_output(text: &str) -> MenuTree {
    let lines: Vec<&str> = text.lines().collect();

    let split = lines.iter().position(|l| RULE_MARKER.is_match(l));
    let (header, body): (&[&str], &[&str]) = match split {
        Some(i) => (&lines[..i], &lines[i + 1..]),
        None => (&lines[..], &[]),
    };
    let body_offset = split.map(|i| i + 1).unwrap_or(lines.len());

    let mut title = String::new();
    let mut title_line = ParsedLine::default();
    let mut header_items = Vec::new();
    let mut saw_title = false;

    for (idx, raw) in header.iter().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        let parsed = ParsedLine::parse(raw);
        if !saw_title {
            saw_title = true;
            title = if parsed.trim() {
                parsed.text.trim().to_string()
            } else {
                parsed.text.clone()
            };
            title_line = parsed;
        } else if parsed.dropdown() {
            header_items.push(MenuNode::item(parsed, idx + 1));
        }
    }

    MenuTree {
        title,
        title_line,
        header_items,
        body: compile_body(body, body_offset),
        unavailable: false,
    }
}

/// Build the body tree with an explicit stack. Depth jumps greater than
/// one clamp to "one deeper than the parent" so a typo never creates an
/// unreachable intermediate submenu.
fn compile_body(lines: &[&str], line_offset: usize) -> Vec<MenuNode> {
    let mut roots: Vec<MenuNode> = Vec::new();
    // stack[i] is the open node at depth i.
    let mut stack: Vec<MenuNode> = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        let source_line = line_offset + idx + 1;
        if raw.trim().is_empty() {
            continue;
        }

        // A bare rule line inside the body is a separator.
        if RULE_MARKER.is_match(raw) {
            close_to(&mut roots, &mut stack, 0);
            attach(&mut roots, &mut stack, MenuNode::separator(source_line));
            continue;
        }

        let (raw_depth, rest) = strip_depth(raw);
        let depth = raw_depth.min(stack.len());
        close_to(&mut roots, &mut stack, depth);

        if RULE_MARKER.is_match(rest) {
            attach(&mut roots, &mut stack, MenuNode::separator(source_line));
            continue;
        }

        let parsed = ParsedLine::parse(rest);
        if !parsed.dropdown() {
            // Parsed for side effects only; never rendered.
            continue;
        }
        stack.push(MenuNode::item(parsed, source_line));
    }

    close_to(&mut roots, &mut stack, 0);
    roots
}

/// Count leading indent-marker units and return the remainder.
fn strip_depth(line: &str) -> (usize, &str) {
    let mut depth = 0;
    let mut rest = line;
    while let Some(r) = rest.strip_prefix(INDENT_MARKER) {
        depth += 1;
        rest = r;
    }
    (depth, rest)
}

/// Pop open nodes until the stack is `depth` deep, attaching each to its
/// parent (or to the roots).
fn close_to(roots: &mut Vec<MenuNode>, stack: &mut Vec<MenuNode>, depth: usize) {
    while stack.len() > depth {
        let node = stack.pop().unwrap_or_else(|| unreachable!());
        attach(roots, stack, node);
    }
}

fn attach(roots: &mut Vec<MenuNode>, stack: &mut Vec<MenuNode>, node: MenuNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => roots.push(node),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script_exec::{ExecFailure, ExecutionResult};

    fn depths(nodes: &[MenuNode], at: usize, out: &mut Vec<usize>) {
        for n in nodes {
            out.push(at);
            depths(&n.children, at + 1, out);
        }
    }

    #[test]
    fn cpu_sample_builds_title_and_nested_body() {
        let tree = compile_output(
            "CPU: 42%|color=red\n---\nDetails|href=https://example.com\n--More|bash=/bin/echo param1=hi",
        );
        assert_eq!(tree.title, "CPU: 42%");
        assert_eq!(tree.title_line.value_str("color"), Some("red"));
        assert!(!tree.unavailable);
        assert_eq!(tree.body.len(), 1);
        assert_eq!(tree.body[0].text, "Details");
        assert_eq!(tree.body[0].children.len(), 1);
        assert_eq!(tree.body[0].children[0].text, "More");
        assert_eq!(
            tree.body[0].children[0].line.bash_params(),
            vec!["hi".to_string()]
        );
    }

    #[test]
    fn no_rule_marker_means_all_header() {
        let tree = compile_output("Title\nEntry one\nEntry two");
        assert_eq!(tree.title, "Title");
        assert_eq!(tree.header_items.len(), 2);
        assert!(tree.body.is_empty());
    }

    #[test]
    fn header_only_recompile_is_idempotent() {
        let full = compile_output("Title|size=12\nEntry|href=https://a.example\n---\nBody item");
        let header_only = compile_output("Title|size=12\nEntry|href=https://a.example");
        assert_eq!(full.title, header_only.title);
        assert_eq!(full.title_line, header_only.title_line);
        assert_eq!(full.header_items, header_only.header_items);
    }

    #[test]
    fn depth_jump_clamps_to_parent_plus_one() {
        // Marker depths 0,1,3,1 must compile to tree depths 0,1,2,1.
        let tree = compile_output("T\n---\na\n--b\n------c\n--d");
        let mut observed = Vec::new();
        depths(&tree.body, 0, &mut observed);
        assert_eq!(observed, vec![0, 1, 2, 1]);
    }

    #[test]
    fn blank_lines_are_dropped() {
        let tree = compile_output("Title\n\n---\n\nitem one\n\nitem two\n");
        assert_eq!(tree.body.len(), 2);
        assert!(tree.header_items.is_empty());
    }

    #[test]
    fn rule_lines_in_body_become_separators() {
        let tree = compile_output("T\n---\na\n---\nb");
        assert_eq!(tree.body.len(), 3);
        assert_eq!(tree.body[1].kind, NodeKind::Separator);
        assert_eq!(tree.body[0].kind, NodeKind::Item);
    }

    #[test]
    fn nested_separator_attaches_to_submenu() {
        let tree = compile_output("T\n---\na\n-- ---\n--b");
        assert_eq!(tree.body.len(), 1);
        let children = &tree.body[0].children;
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].kind, NodeKind::Separator);
        assert_eq!(children[1].text, "b");
    }

    #[test]
    fn dropdown_false_lines_are_parsed_but_hidden() {
        let tree = compile_output("T\n---\nvisible\nhidden|dropdown=false\nalso visible");
        let texts: Vec<&str> = tree.body.iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["visible", "also visible"]);
    }

    #[test]
    fn dropdown_false_in_header_is_hidden_but_title_stays() {
        let tree = compile_output("Title\nmeta|dropdown=false\nshown");
        assert_eq!(tree.title, "Title");
        assert_eq!(tree.header_items.len(), 1);
        assert_eq!(tree.header_items[0].text, "shown");
    }

    #[test]
    fn trim_strips_display_text() {
        let tree = compile_output("T\n---\n  padded  |trim=true\n  kept  ");
        assert_eq!(tree.body[0].text, "padded");
        assert_eq!(tree.body[1].text, "  kept  ");
        // The parsed line keeps the original text for the renderer.
        assert_eq!(tree.body[0].line.text, "  padded  ");
    }

    #[test]
    fn sibling_depths_pop_back_correctly() {
        let tree = compile_output("T\n---\na\n--a1\n--a2\nb\n--b1");
        assert_eq!(tree.body.len(), 2);
        assert_eq!(tree.body[0].children.len(), 2);
        assert_eq!(tree.body[1].children.len(), 1);
        assert_eq!(tree.body[1].children[0].text, "b1");
    }

    #[test]
    fn source_lines_are_recorded() {
        let tree = compile_output("T\n---\nfirst\n--second");
        assert_eq!(tree.body[0].source_line, 3);
        assert_eq!(tree.body[0].children[0].source_line, 4);
    }

    #[test]
    fn failed_execution_compiles_to_unavailable() {
        let result = ExecutionResult::failed_for_test(ExecFailure::NonZeroExit { code: 3 });
        let tree = compile(&result);
        assert!(tree.unavailable);
        assert_eq!(tree.title, UNAVAILABLE_TITLE);
    }

    #[test]
    fn empty_stdout_compiles_to_unavailable() {
        let result = ExecutionResult::ok_for_test("  \n \n");
        assert!(compile(&result).unavailable);
    }

    #[test]
    fn parsed_empty_body_is_not_unavailable() {
        let result = ExecutionResult::ok_for_test("Just a title");
        let tree = compile(&result);
        assert!(!tree.unavailable);
        assert!(tree.body.is_empty());
    }
}
