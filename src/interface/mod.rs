//! Terminal presentation for the command-line front end

use crate::hardware::{CapabilityReport, DeviceInfo};
use crate::transmit::TransmissionReport;

/// Rows for the `info` table
pub fn device_info_rows(info: &DeviceInfo, capability: &CapabilityReport) -> Vec<Vec<String>> {
    let yes_no = |b: bool| if b { "yes" } else { "no" }.to_string();
    let probed = |v: Option<bool>| v.map_or_else(|| "not probed".to_string(), yes_no);
    vec![
        vec!["Status".to_string(), format!("{} ({})", info.status, info.info)],
        vec!["Board".to_string(), info.board_id.clone()],
        vec!["Capability".to_string(), info.capability.to_string()],
        vec!["Device present".to_string(), yes_no(info.device_present)],
        vec!["Native library".to_string(), yes_no(capability.native_loaded)],
        vec!["Native devices".to_string(), capability.native_device_count.to_string()],
        vec!["Transfer tool".to_string(), probed(capability.cli_available)],
        vec!["Frequency".to_string(), utils::format_frequency(info.current_frequency)],
        vec!["Sample rate".to_string(), utils::format_sample_rate(info.current_sample_rate as f64)],
        vec!["Gain".to_string(), format!("{} dB", info.current_gain)],
        vec!["Transmitting".to_string(), yes_no(info.transmission_active)],
    ]
}

/// One-line summary of a finished session
pub fn report_summary(report: &TransmissionReport) -> String {
    let tiers: Vec<&str> = report.tiers_attempted.iter().map(|t| t.as_str()).collect();
    format!(
        "{:?} via {} in {} (tried: {})",
        report.outcome,
        report.backend_used.map_or("no backend", |t| t.as_str()),
        utils::format_duration(report.elapsed.as_secs_f64()),
        tiers.join(" -> "),
    )
}

/// Interface utilities
pub mod utils {
    use colored::*;
    use console::Term;
    use indicatif::{ProgressBar, ProgressStyle};

    /// Print a success message
    pub fn print_success(msg: &str) {
        println!("{} {}", "✓".green(), msg);
    }

    /// Print an error message
    pub fn print_error(msg: &str) {
        eprintln!("{} {}", "✗".red(), msg);
    }

    /// Print a warning message
    pub fn print_warning(msg: &str) {
        println!("{} {}", "⚠".yellow(), msg);
    }

    /// Print a table
    pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
        use prettytable::{Table, Row, Cell};

        let mut table = Table::new();
        let header_cells: Vec<Cell> = headers.iter()
            .map(|h| Cell::new(h).style_spec("Fb"))
            .collect();
        table.add_row(Row::new(header_cells));

        for row in rows {
            let cells: Vec<Cell> = row.iter()
                .map(|c| Cell::new(c))
                .collect();
            table.add_row(Row::new(cells));
        }

        table.printstd();
    }

    /// Progress bar over `total` tenths of a second; hidden when stdout is not a terminal
    pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
        if !Term::stdout().is_term() {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb
    }

    /// Format duration for display
    pub fn format_duration(secs: f64) -> String {
        if secs < 1.0 {
            format!("{:.1} ms", secs * 1000.0)
        } else if secs < 60.0 {
            format!("{:.1} s", secs)
        } else if secs < 3600.0 {
            let mins = (secs / 60.0) as u64;
            let secs = secs % 60.0;
            format!("{} min {:.1} s", mins, secs)
        } else {
            let hours = (secs / 3600.0) as u64;
            let mins = ((secs % 3600.0) / 60.0) as u64;
            format!("{} hr {} min", hours, mins)
        }
    }

    /// Format sample rate for display
    pub fn format_sample_rate(rate: f64) -> String {
        if rate >= 1e9 {
            format!("{:.2} Gsps", rate / 1e9)
        } else if rate >= 1e6 {
            format!("{:.2} Msps", rate / 1e6)
        } else if rate >= 1e3 {
            format!("{:.2} Ksps", rate / 1e3)
        } else {
            format!("{:.2} sps", rate)
        }
    }

    /// Format an RF frequency for display
    pub fn format_frequency(hz: u64) -> String {
        let hz = hz as f64;
        if hz >= 1e9 {
            format!("{:.3} GHz", hz / 1e9)
        } else if hz >= 1e6 {
            format!("{:.3} MHz", hz / 1e6)
        } else if hz >= 1e3 {
            format!("{:.3} kHz", hz / 1e3)
        } else {
            format!("{} Hz", hz)
        }
    }
}
