//! Server-side HTML for the attendance dashboard.

use chrono::NaiveDate;
use rollcall_core::attendance::{AttendanceRecord, COLUMNS};
use rollcall_core::report::{self, DaysPresent};
use std::fmt::Write;

const CHART_WIDTH: f32 = 640.0;
const CHART_HEIGHT: f32 = 320.0;
const CHART_MARGIN_LEFT: f32 = 56.0;
const CHART_MARGIN_RIGHT: f32 = 16.0;
const CHART_MARGIN_TOP: f32 = 40.0;
const CHART_MARGIN_BOTTOM: f32 = 64.0;
const BAR_COLOR: &str = "#2980b9";
const PANEL_COLOR: &str = "#ecf0f1";

const STYLE: &str = "\
body { font-family: Arial, sans-serif; margin: 20px; }
h1 { text-align: center; color: #2c3e50; }
.panels { margin-bottom: 20px; }
.panel { width: 48%; display: inline-block; vertical-align: top; }
.panel + .panel { margin-left: 2%; }
.card { max-height: 300px; overflow-y: auto; border: 1px solid #ccc; padding: 10px; border-radius: 10px; background-color: #ecf0f1; }
.chart { border: 1px solid #ccc; border-radius: 10px; padding: 10px; }
th { padding: 5px; border-bottom: 1px solid #7f8c8d; text-align: left; }
td { padding: 5px; }
td.today { color: #27ae60; font-weight: bold; }
";

/// Everything one page render needs.
pub struct PageInput<'a> {
    /// `None` when the attendance file does not exist.
    pub records: Option<&'a [AttendanceRecord]>,
    pub today: NaiveDate,
    pub refresh_secs: u64,
}

/// Render the full dashboard page.
pub fn page(input: &PageInput<'_>) -> String {
    let (all_table, today_table, chart) = match input.records {
        Some(records) => {
            let today: Vec<&AttendanceRecord> = report::on_date(records, input.today);
            (
                table(records.iter(), None),
                table(today.into_iter(), Some("today")),
                bar_chart(&report::days_present(records)),
            )
        }
        None => (
            "No records".to_string(),
            "No records".to_string(),
            bar_chart(&[]),
        ),
    };

    format!(
        "<!DOCTYPE html>\n\
         <html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta http-equiv=\"refresh\" content=\"{refresh}\">\n\
         <title>Attendance Dashboard</title>\n<style>\n{STYLE}</style>\n</head>\n<body>\n\
         <h1>Attendance Dashboard</h1>\n\
         <div class=\"panels\">\n\
         <div class=\"panel\"><h3 style=\"color: #34495e\">All Attendance Records</h3>\
         <div id=\"all-attendance\" class=\"card\">{all_table}</div></div>\n\
         <div class=\"panel\"><h3 style=\"color: #27ae60\">Attendance Today</h3>\
         <div id=\"today-attendance\" class=\"card\">{today_table}</div></div>\n\
         </div>\n\
         <h3 style=\"color: #2980b9\">Attendance Summary</h3>\n\
         <div id=\"summary-graph\" class=\"chart\">{chart}</div>\n\
         </body>\n</html>\n",
        refresh = input.refresh_secs.max(1),
    )
}

fn table<'a>(rows: impl Iterator<Item = &'a AttendanceRecord>, cell_class: Option<&str>) -> String {
    let mut html = String::from("<table><tr>");
    for col in COLUMNS {
        let _ = write!(html, "<th>{col}</th>");
    }
    html.push_str("</tr>");

    let class_attr = cell_class.map(|c| format!(" class=\"{c}\"")).unwrap_or_default();
    for r in rows {
        let _ = write!(
            html,
            "<tr><td{class_attr}>{}</td><td{class_attr}>{}</td><td{class_attr}>{}</td></tr>",
            escape(&r.name),
            escape(&r.date),
            escape(&r.timestamp),
        );
    }
    html.push_str("</table>");
    html
}

/// "Total Days Present" bar chart as inline SVG.
fn bar_chart(summary: &[DaysPresent]) -> String {
    let plot_w = CHART_WIDTH - CHART_MARGIN_LEFT - CHART_MARGIN_RIGHT;
    let plot_h = CHART_HEIGHT - CHART_MARGIN_TOP - CHART_MARGIN_BOTTOM;
    let baseline = CHART_MARGIN_TOP + plot_h;
    let max_days = summary.iter().map(|d| d.days).max().unwrap_or(0).max(1);
    let tick_step = max_days.div_ceil(5).max(1);

    let mut svg = String::new();
    let _ = write!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{CHART_WIDTH}\" height=\"{CHART_HEIGHT}\" \
         role=\"img\" aria-label=\"Total Days Present\">\
         <rect width=\"100%\" height=\"100%\" fill=\"{PANEL_COLOR}\"/>\
         <text x=\"{}\" y=\"24\" text-anchor=\"middle\" font-size=\"16\">Total Days Present</text>",
        CHART_WIDTH / 2.0
    );

    let mut tick = 0;
    while tick <= max_days {
        let y = baseline - plot_h * tick as f32 / max_days as f32;
        let _ = write!(
            svg,
            "<line x1=\"{CHART_MARGIN_LEFT}\" x2=\"{}\" y1=\"{y}\" y2=\"{y}\" stroke=\"#bdc3c7\"/>\
             <text x=\"{}\" y=\"{}\" text-anchor=\"end\" font-size=\"11\">{tick}</text>",
            CHART_MARGIN_LEFT + plot_w,
            CHART_MARGIN_LEFT - 6.0,
            y + 4.0
        );
        tick += tick_step;
    }

    if !summary.is_empty() {
        let slot = plot_w / summary.len() as f32;
        let bar_w = slot * 0.6;
        for (i, d) in summary.iter().enumerate() {
            let bar_h = plot_h * d.days as f32 / max_days as f32;
            let x = CHART_MARGIN_LEFT + slot * i as f32 + (slot - bar_w) / 2.0;
            let name = escape(&d.name);
            let _ = write!(
                svg,
                "<rect x=\"{x}\" y=\"{}\" width=\"{bar_w}\" height=\"{bar_h}\" fill=\"{BAR_COLOR}\" \
                 data-name=\"{name}\" data-days=\"{}\"><title>{name}: {}</title></rect>\
                 <text x=\"{}\" y=\"{}\" text-anchor=\"middle\" font-size=\"12\">{name}</text>",
                baseline - bar_h,
                d.days,
                d.days,
                x + bar_w / 2.0,
                baseline + 16.0,
            );
        }
    }

    let _ = write!(
        svg,
        "<text x=\"{}\" y=\"{}\" text-anchor=\"middle\" font-size=\"13\">Name</text>\
         <text x=\"14\" y=\"{}\" text-anchor=\"middle\" font-size=\"13\" \
         transform=\"rotate(-90 14 {})\">Days Present</text></svg>",
        CHART_MARGIN_LEFT + plot_w / 2.0,
        CHART_HEIGHT - 12.0,
        CHART_MARGIN_TOP + plot_h / 2.0,
        CHART_MARGIN_TOP + plot_h / 2.0,
    );
    svg
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
