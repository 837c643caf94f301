//! Plain text table rendering for context dumps.

use super::ContextValue;

/// Longest string cell kept in short mode, in bytes.
const SHORT_LIMIT: usize = 20;

/// Printable form of a value, truncating long strings in short mode.
pub(super) fn cell(value: &ContextValue, short: bool) -> String {
    let printed = value.to_print();
    if !short || !matches!(value, ContextValue::String(_)) || printed.len() <= SHORT_LIMIT {
        return printed;
    }

    let mut cut = SHORT_LIMIT;
    while !printed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...({} bytes more)", &printed[..cut], printed.len() - cut)
}

/// Render a bordered table. Cells containing newlines span several lines.
pub(super) fn render<const N: usize>(header: [&str; N], rows: &[[String; N]]) -> String {
    let mut widths = header.map(|title| title.chars().count());
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            let longest = cell.lines().map(|line| line.chars().count()).max().unwrap_or(0);
            *width = (*width).max(longest);
        }
    }

    let border = {
        let mut line = String::from("+");
        for width in &widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
        }
        line.push('\n');
        line
    };

    let mut out = border.clone();
    push_row(&mut out, &widths, &header.map(str::to_string));
    out.push_str(&border);
    for row in rows {
        push_row(&mut out, &widths, row);
    }
    if !rows.is_empty() {
        out.push_str(&border);
    }
    out
}

fn push_row<const N: usize>(out: &mut String, widths: &[usize; N], row: &[String; N]) {
    let cells: Vec<Vec<&str>> = row
        .iter()
        .map(|cell| {
            let lines: Vec<&str> = cell.lines().collect();
            if lines.is_empty() {
                vec![""]
            } else {
                lines
            }
        })
        .collect();
    let height = cells.iter().map(Vec::len).max().unwrap_or(1);

    for line in 0..height {
        out.push('|');
        for (cell, width) in cells.iter().zip(widths.iter()) {
            let text = cell.get(line).copied().unwrap_or("");
            let pad = width - text.chars().count();
            out.push(' ');
            out.push_str(text);
            out.push_str(&" ".repeat(pad + 1));
            out.push('|');
        }
        out.push('\n');
    }
}
