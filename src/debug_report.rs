use fieldsmith::{BuildResult, BuilderMode, DimensionOrigin, Field, Options, SelectionPart};

mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const DIM: &str = "\x1b[2m";
    pub const BOLD: &str = "\x1b[1m";

    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const BLUE: &str = "\x1b[34m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";

    pub struct Palette {
        enabled: bool,
    }

    impl Palette {
        pub fn new(enabled: bool) -> Self {
            Self { enabled }
        }

        pub fn paint(&self, s: impl AsRef<str>, color: &str) -> String {
            if self.enabled { format!("{}{}{}", color, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn bold(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", BOLD, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }

        pub fn dim(&self, s: impl AsRef<str>) -> String {
            if self.enabled { format!("{}{}{}", DIM, s.as_ref(), RESET) } else { s.as_ref().to_string() }
        }
    }
}

/// Size of the generated demo input.
pub struct Run {
    pub customers: usize,
    pub orders: usize,
    pub candidates: usize,
}

pub fn print_run(run: &Run, options: &Options, result: &BuildResult, color: bool) {
    let palette = ansi::Palette::new(color);
    let mode = BuilderMode::from_options(options);
    let title = format!(
        "⚙  Building: {} customers, {} orders, {} candidates ({} mode)",
        run.customers,
        run.orders,
        run.candidates,
        mode.label()
    );
    println!("\n{}", palette.bold(palette.paint(title, ansi::CYAN)));

    println!("\n{}", palette.paint("━━━ Analysis ━━━", ansi::GRAY));
    print_analysis(result, &palette);

    println!("\n{}", palette.paint("━━━ Created fields ━━━", ansi::GRAY));
    if result.created_fields.is_empty() {
        println!("{}", palette.dim("  No field created"));
        println!("\n{}", palette.paint("Possible reasons:", ansi::YELLOW));
        println!("  • Every candidate formula already existed");
        println!("  • --max-fields is 0");
        println!("  • Candidate parts did not resolve after analysis");
    } else {
        print_fields(result, &palette);
    }

    if !result.created_blocks.is_empty() {
        println!("\n{}", palette.paint("━━━ Blocks ━━━", ansi::GRAY));
        print_blocks(result, &palette);
    }

    let metrics = &result.metrics;
    println!("\n{}", palette.paint("━━━ Timing ━━━", ansi::GRAY));
    println!(
        "  Total: {}  │  Analysis: {}  │  Construction: {}  │  Compliance: {}",
        palette.paint(format!("{:?}", metrics.total), ansi::GREEN),
        palette.paint(format!("{:?}", metrics.analysis.total), ansi::CYAN),
        palette.paint(format!("{:?}", metrics.construction.duration), ansi::CYAN),
        palette.dim(format!("{:?}", metrics.compliance)),
    );
    println!(
        "  {} {}  {} {}  {} {}",
        palette.dim("reused:"),
        palette.paint(metrics.construction.fields_reused.to_string(), ansi::YELLOW),
        palette.dim("used rules:"),
        palette.paint(metrics.construction.used_rules.to_string(), ansi::YELLOW),
        palette.dim("block rules:"),
        palette.paint(metrics.construction.block_rules.to_string(), ansi::YELLOW),
    );
    println!();
}

fn print_analysis(result: &BuildResult, palette: &ansi::Palette) {
    let metrics = &result.metrics;
    println!(
        "  Sampled {} objects for {} operands  │  dropped {} of {} candidates",
        palette.paint(metrics.analysis.objects_read.to_string(), ansi::BLUE),
        palette.paint(metrics.analysis.dimensions.to_string(), ansi::BLUE),
        palette.paint(metrics.rules_dropped.to_string(), ansi::YELLOW),
        metrics.rules_requested,
    );

    for (_, dimension) in result.space.dimensions() {
        let Some(stats) = &dimension.stats else {
            continue;
        };
        let name = match &dimension.origin {
            DimensionOrigin::Field(field) => format!("{}.{}", dimension.class, field.name),
            DimensionOrigin::Rule(rule) => format!("{}.{}", dimension.class, rule.name()),
        };
        println!(
            "  {} {}",
            palette.paint(name, ansi::BLUE),
            palette.dim(format!("granularities {:?}", stats.granularities()))
        );
        for (level, granularity) in stats.granularities().iter().enumerate() {
            let parts: Vec<String> = stats.parts_at(level).iter().map(fmt_part).collect();
            println!(
                "    {} {}",
                palette.paint(format!("G{granularity}"), ansi::YELLOW),
                palette.dim(parts.join("  "))
            );
        }
    }
}

fn print_fields(result: &BuildResult, palette: &ansi::Palette) {
    for (idx, (class, name)) in result.created_fields.iter().enumerate() {
        let Some(field) = result.schema.entity(class).and_then(|e| e.field(name)) else {
            continue;
        };
        let status = if field.is_used() { palette.paint("used", ansi::GREEN) } else { palette.dim("intermediate") };
        println!(
            "  {} {} {} {} {}",
            palette.paint(format!("[{idx}]"), ansi::GRAY),
            palette.bold(palette.paint(format!("{class}.{name}"), ansi::GREEN)),
            palette.dim("│"),
            status,
            palette.paint(format!("cost {}", field.cost), ansi::YELLOW),
        );
        println!("      {} {}", palette.dim("type:"), palette.paint(field.field_type.to_string(), ansi::BLUE));
        if let Some(definition) = fmt_definition(field) {
            println!("      {} {}", palette.dim("formula:"), palette.paint(definition, ansi::CYAN));
        }
    }
}

fn print_blocks(result: &BuildResult, palette: &ansi::Palette) {
    for (class, name) in &result.created_blocks {
        let Some(entity) = result.schema.entity(class) else {
            continue;
        };
        let Some(block) = entity.block(name) else {
            continue;
        };
        let members = entity.block_members(name).count();
        println!(
            "  {} {} {}",
            palette.bold(palette.paint(format!("{class}.{name}"), ansi::GREEN)),
            palette.dim("│"),
            palette.paint(format!("{members} members"), ansi::YELLOW),
        );
        println!("      {} {}", palette.dim("formula:"), palette.paint(block.formula.to_string(), ansi::CYAN));
    }
}

fn fmt_definition(field: &Field) -> Option<String> {
    match (&field.formula, &field.block, field.var_key) {
        (Some(formula), _, _) => Some(formula.to_string()),
        (None, Some(block), Some(key)) => Some(format!("member {key} of {block}")),
        _ => None,
    }
}

fn fmt_part(part: &SelectionPart) -> String {
    match part {
        SelectionPart::Interval { lower, upper, index } => format!("{index}:]{lower}, {upper}]"),
        SelectionPart::Value { value, index, outside } if outside.is_empty() => format!("{index}:{{{value}}}"),
        SelectionPart::Value { index, outside, .. } => format!("{index}:not {{{}}}", outside.join(", ")),
    }
}
