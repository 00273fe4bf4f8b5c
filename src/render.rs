use crate::analysis::ScanGrid;
use crate::indicators::{RsiResult, RsiThresholds, Zone};
use chrono::{DateTime, Utc};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

const OVERSOLD_BG: Color = Color::Rgb { r: 176, g: 0, b: 32 };
const OVERBOUGHT_BG: Color = Color::Rgb { r: 0, g: 121, b: 107 };
const NEUTRAL_FG: Color = Color::Rgb { r: 209, g: 210, b: 214 };

pub fn format_rsi(rsi: RsiResult) -> String {
    match rsi.value() {
        Some(v) => format!("{v:.2}"),
        None => "N/A".to_string(),
    }
}

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn rsi_cell(rsi: RsiResult, zone: Zone) -> Cell {
    let cell = Cell::new(format_rsi(rsi)).set_alignment(CellAlignment::Center);
    match zone {
        Zone::Oversold => cell.bg(OVERSOLD_BG).fg(Color::White).add_attribute(Attribute::Bold),
        Zone::Overbought => cell.bg(OVERBOUGHT_BG).fg(Color::White).add_attribute(Attribute::Bold),
        Zone::Neutral if rsi.is_undefined() => cell.fg(Color::DarkGrey),
        Zone::Neutral => cell.fg(NEUTRAL_FG),
    }
}

fn rsi_table(grid: &ScanGrid, thresholds: &RsiThresholds) -> Table {
    let mut header = vec![Cell::new("Pair").add_attribute(Attribute::Bold)];
    header.extend(grid.timeframes.iter().map(|tf| {
        Cell::new(tf.label())
            .add_attribute(Attribute::Bold)
            .set_alignment(CellAlignment::Center)
    }));

    let mut table = base_table();
    table.set_header(header);
    for row in &grid.rows {
        let mut cells = vec![Cell::new(row.pair.to_string()).add_attribute(Attribute::Bold)];
        cells.extend(
            row.cells
                .iter()
                .map(|cell| rsi_cell(cell.rsi, thresholds.classify(cell.rsi))),
        );
        table.add_row(cells);
    }
    table
}

fn summary_table(grid: &ScanGrid, thresholds: &RsiThresholds) -> Table {
    let summary = grid.summary(thresholds);

    let mut table = base_table();
    table.set_header(summary.iter().map(|s| {
        Cell::new(format!("Signals {}", s.timeframe.label()))
            .add_attribute(Attribute::Bold)
            .set_alignment(CellAlignment::Center)
    }));
    table.add_row(summary.iter().map(|s| {
        let text = if s.valid == 0 {
            "N/A".to_string()
        } else {
            s.signals().to_string()
        };
        Cell::new(text).set_alignment(CellAlignment::Center)
    }));
    table.add_row(summary.iter().map(|s| {
        let text = if s.valid == 0 {
            "No data".to_string()
        } else {
            format!("oversold {} | overbought {}", s.oversold, s.overbought)
        };
        Cell::new(text)
            .fg(Color::DarkGrey)
            .set_alignment(CellAlignment::Center)
    }));
    table
}

/// Renders the finished grid, its signal summary and any cell diagnostics.
pub fn render(grid: &ScanGrid, thresholds: &RsiThresholds, generated_at: DateTime<Utc>) -> String {
    let mut out = format!(
        "RSI Screener (OHLC4) - data taken at {} UTC\nOversold: RSI <= {} | Overbought: RSI >= {}\n\n",
        generated_at.format("%d-%m-%Y %H:%M:%S"),
        thresholds.oversold,
        thresholds.overbought,
    );

    if grid.rows.is_empty() {
        out.push_str("No data found.\n");
        return out;
    }

    out.push_str(&format!("{}\n\n", rsi_table(grid, thresholds)));
    out.push_str(&format!("{}\n", summary_table(grid, thresholds)));

    let issues: Vec<String> = grid
        .cells()
        .filter_map(|(pair, cell)| {
            cell.issue
                .as_ref()
                .map(|issue| format!("  {pair} {}: {issue}", cell.timeframe))
        })
        .collect();
    if !issues.is_empty() {
        out.push_str("\nWarnings:\n");
        for line in issues {
            out.push_str(&line);
            out.push('\n');
        }
    }

    out.push_str(&format!("\n{} pairs analyzed.\n", grid.rows.len()));
    out
}
