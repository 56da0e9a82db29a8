use console::Style;
use stackprep_core::catalog::FrameCatalog;
use stackprep_core::diagnostics::{DiagnosticReport, Severity};
use stackprep_core::frame::ImageType;
use stackprep_core::pipeline::{RunSummary, StageOutcome};
use stackprep_core::rejection::best_rejection_method;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    path: Style,
    warning: Style,
    error: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            path: Style::new().underlined(),
            warning: Style::new().yellow(),
            error: Style::new().red().bold(),
        }
    }
}

fn rule(s: &Styles) {
    println!("  {}", s.title.apply_to("\u{2550}".repeat(16)));
}

/// Groups in display order, calibration types first, with the rejection
/// algorithm recommended for each group size.
pub fn print_groups(catalog: &FrameCatalog) {
    let s = Styles::new();
    let sorted = catalog.sorted();

    println!();
    println!("  {}", s.title.apply_to("Frame Groups"));
    rule(&s);

    for image_type in [ImageType::Bias, ImageType::Dark, ImageType::Flat, ImageType::Light] {
        let groups: Vec<_> = sorted.iter().filter(|g| g.image_type == image_type).collect();
        if groups.is_empty() {
            continue;
        }
        println!();
        println!("  {}", s.header.apply_to(image_type));
        for g in groups {
            println!(
                "    {:<10}{}",
                s.label.apply_to("Binning"),
                s.value.apply_to(g.binning)
            );
            if !matches!(image_type, ImageType::Bias | ImageType::Dark) {
                println!(
                    "    {:<10}{}",
                    s.label.apply_to("Filter"),
                    s.value.apply_to(g.display_filter())
                );
            }
            if image_type != ImageType::Bias {
                println!(
                    "    {:<10}{}",
                    s.label.apply_to("Exposure"),
                    s.value.apply_to(g.exposures_label())
                );
            }
            if g.master_frame {
                println!(
                    "    {:<10}{}",
                    s.label.apply_to("Master"),
                    s.path.apply_to(g.master_path().map(|p| p.display().to_string()).unwrap_or_default())
                );
            } else {
                println!(
                    "    {:<10}{}",
                    s.label.apply_to("Frames"),
                    s.value.apply_to(g.len())
                );
                println!(
                    "    {:<10}{}",
                    s.label.apply_to("Rejection"),
                    s.method.apply_to(best_rejection_method(g.len()))
                );
            }
            println!();
        }
    }
}

pub fn print_diagnostics(report: &DiagnosticReport) {
    let s = Styles::new();
    println!();
    println!("  {}", s.title.apply_to("Diagnostics"));
    rule(&s);
    if report.is_empty() {
        println!("  {}", s.method.apply_to("No problems found"));
    }
    for m in report.messages() {
        let style = match m.severity {
            Severity::Error => &s.error,
            Severity::Warning => &s.warning,
        };
        println!("  {}", style.apply_to(m));
    }
    println!();
}

pub fn print_run_summary(summary: &RunSummary) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Run Summary"));
    rule(&s);
    println!();

    for (stage, outcome) in &summary.stages {
        let status = match outcome {
            StageOutcome::Completed => s.method.apply_to("completed".to_string()),
            StageOutcome::Skipped => s.disabled.apply_to("skipped".to_string()),
            StageOutcome::Failed(reasons) => {
                s.error.apply_to(format!("failed ({})", reasons.len()))
            }
        };
        println!("  {:<20}{}", s.label.apply_to(stage), status);
    }
    println!();

    if !summary.masters.is_empty() {
        println!("  {}", s.header.apply_to("Masters"));
        for m in &summary.masters {
            println!(
                "    {:<10}{}",
                s.label.apply_to(m.image_type),
                s.path.apply_to(m.path.display())
            );
        }
        println!();
    }
    if !summary.light_masters.is_empty() {
        println!("  {}", s.header.apply_to("Master lights"));
        for p in &summary.light_masters {
            println!("    {}", s.path.apply_to(p.display()));
        }
        println!();
    }
    if let Some(ref reference) = summary.reference {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Reference"),
            s.path.apply_to(reference.display())
        );
    }
    if let Some(ref log_file) = summary.log_file {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Process log"),
            s.path.apply_to(log_file.display())
        );
    }
    println!();
}
