use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::scan;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub sample_head: usize,
    pub sample_tail: usize,
    pub sample_every: usize,
    pub z_outlier: f64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            sample_head: 5,
            sample_tail: 5,
            sample_every: 50,
            z_outlier: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateMeta {
    pub sample_head: usize,
    pub sample_tail: usize,
    pub sample_every: usize,
    pub spans_aggregated: usize,
    pub rows_dropped: usize,
}

#[derive(Debug, Clone)]
pub struct AggregatePass {
    pub text: String,
    pub meta: AggregateMeta,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stdev: f64,
    pub p10: f64,
    pub p90: f64,
}

impl ColumnStats {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(Self {
            count: samples.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            stdev: variance.sqrt(),
            p10: percentile(&sorted, 10.0),
            p90: percentile(&sorted, 90.0),
        })
    }

    fn render(&self, column: &str) -> String {
        format!(
            "{column}:count={},min={},max={},mean={},p10={},p90={}",
            self.count,
            format_sig4(self.min),
            format_sig4(self.max),
            format_sig4(self.mean),
            format_sig4(self.p10),
            format_sig4(self.p90),
        )
    }
}

/// Nearest-rank percentile over an already sorted sample.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let last = sorted.len() - 1;
    let rank = (p / 100.0 * last as f64).round_ties_even();
    sorted[(rank.max(0.0) as usize).min(last)]
}

/// Plain signed integer or decimal, tolerating surrounding single quotes.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let t = value.trim().trim_matches('\'');
    let digits = t.strip_prefix(['-', '+']).unwrap_or(t);
    let (int, frac) = match digits.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int) || !frac.map_or(true, all_digits) {
        return None;
    }
    t.parse().ok()
}

/// Four significant digits, `%g` style.
pub fn format_sig4(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let sci = format!("{x:.3e}");
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if (-4..4).contains(&exp) {
        let decimals = (3 - exp).max(0) as usize;
        strip_zeros(&format!("{x:.decimals$}")).to_string()
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", strip_zeros(mantissa), exp.abs())
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Samples long runs of data rows and appends an `[AGG ...]` summary line per
/// span with enough numeric data.
pub fn apply_aggregation(text: &str, config: &AggregateConfig) -> AggregatePass {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut meta = AggregateMeta {
        sample_head: config.sample_head,
        sample_tail: config.sample_tail,
        sample_every: config.sample_every,
        ..AggregateMeta::default()
    };

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if scan::is_dict_begin(line) {
            let end = lines[i..]
                .iter()
                .position(|l| scan::is_dict_end(l))
                .map_or(lines.len(), |offset| i + offset + 1);
            out.extend(lines[i..end].iter().map(|l| l.to_string()));
            i = end;
            continue;
        }
        if scan::is_marker_line(line) {
            out.push(line.to_string());
            i += 1;
            continue;
        }
        let start = i;
        while i < lines.len() && !scan::is_marker_line(lines[i]) && !scan::is_dict_begin(lines[i])
        {
            i += 1;
        }
        emit_span(&lines[start..i], config, &mut out, &mut meta);
    }

    tracing::debug!(
        spans = meta.spans_aggregated,
        dropped = meta.rows_dropped,
        "span aggregation"
    );
    AggregatePass {
        text: out.join("\n"),
        meta,
    }
}

fn emit_span(
    span: &[&str],
    config: &AggregateConfig,
    out: &mut Vec<String>,
    meta: &mut AggregateMeta,
) {
    let head = config.sample_head;
    let tail = config.sample_tail;
    if span.len() <= head + tail {
        out.extend(span.iter().map(|l| l.to_string()));
        return;
    }

    let rows: Vec<Vec<(String, f64)>> = span
        .iter()
        .map(|line| {
            scan::assignments(line)
                .iter()
                .filter_map(|cell| Some((cell.column.to_string(), parse_numeric(cell.value)?)))
                .collect()
        })
        .collect();

    let mut samples: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (column, x) in rows.iter().flatten() {
        samples.entry(column.as_str()).or_default().push(*x);
    }
    let stats: BTreeMap<&str, ColumnStats> = samples
        .into_iter()
        .filter(|(_, xs)| xs.len() >= head + tail + 1)
        .filter_map(|(column, xs)| Some((column, ColumnStats::from_samples(&xs)?)))
        .collect();

    let mut keep: BTreeSet<usize> = (0..head.min(span.len())).collect();
    keep.extend(span.len().saturating_sub(tail)..span.len());
    let step = config.sample_every.max(1);
    keep.extend((head..span.len().saturating_sub(tail)).step_by(step));
    for (idx, row) in rows.iter().enumerate() {
        let outlier = row.iter().any(|(column, x)| {
            stats.get(column.as_str()).map_or(false, |st| {
                st.stdev > 0.0 && ((x - st.mean) / st.stdev).abs() >= config.z_outlier
            })
        });
        if outlier {
            keep.insert(idx);
        }
    }

    out.extend(keep.iter().map(|&idx| span[idx].to_string()));
    meta.rows_dropped += span.len() - keep.len();

    if !stats.is_empty() {
        let parts: Vec<String> = stats.iter().map(|(col, st)| st.render(col)).collect();
        out.push(format!(
            "{} span={} kept={} stats={}]",
            scan::AGG_PREFIX,
            span.len(),
            keep.len(),
            parts.join(scan::CELL_SEPARATOR)
        ));
        meta.spans_aggregated += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_rows(values: &[i64]) -> String {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| format!("A{}={v}", i + 2))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn uniform_span_keeps_head_tail_and_periodic_rows() {
        let body = numeric_rows(&[7; 12]);
        let text = format!("[ANCHOR]A1='n'::header\n{body}");
        let config = AggregateConfig {
            sample_head: 2,
            sample_tail: 2,
            sample_every: 50,
            z_outlier: 3.0,
        };
        let pass = apply_aggregation(&text, &config);
        let lines: Vec<&str> = pass.text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[ANCHOR]A1='n'::header",
                "A2=7",
                "A3=7",
                "A4=7",
                "A12=7",
                "A13=7",
                "[AGG span=12 kept=5 stats=A:count=12,min=7,max=7,mean=7,p10=7,p90=7]",
            ]
        );
        assert_eq!(pass.meta.spans_aggregated, 1);
        assert_eq!(pass.meta.rows_dropped, 7);
    }

    #[test]
    fn outliers_survive_sampling() {
        let mut values = vec![10; 30];
        values[15] = 1000;
        let config = AggregateConfig {
            sample_head: 2,
            sample_tail: 2,
            sample_every: 100,
            z_outlier: 3.0,
        };
        let pass = apply_aggregation(&numeric_rows(&values), &config);
        assert!(pass.text.contains("A17=1000"));
        assert!(pass.text.contains("kept=6"));
    }

    #[test]
    fn short_spans_pass_through() {
        let text = "[ANCHOR]# Sheet: S (3x1)\nA1=1\nA2=2\nA3=3";
        let pass = apply_aggregation(text, &AggregateConfig::default());
        assert_eq!(pass.text, text);
    }

    #[test]
    fn long_span_without_numbers_is_sampled_without_summary() {
        let body: Vec<String> = (1..=12).map(|i| format!("A{i}='row {i}'")).collect();
        let config = AggregateConfig {
            sample_head: 2,
            sample_tail: 2,
            ..AggregateConfig::default()
        };
        let pass = apply_aggregation(&body.join("\n"), &config);
        assert!(!pass.text.contains("[AGG"));
        assert_eq!(pass.text.lines().count(), 5);
    }

    #[test]
    fn dictionary_block_is_left_intact() {
        let mut lines: Vec<String> = (1..=12).map(|i| format!("A{i}=@C{{A}}t1")).collect();
        lines.push("[DICT-BEGIN]".into());
        lines.push("[COL A]".into());
        lines.push("@C{A}t1='x'".into());
        lines.push("[DICT-END]".into());
        let pass = apply_aggregation(&lines.join("\n"), &AggregateConfig::default());
        assert!(pass.text.ends_with("[DICT-BEGIN]\n[COL A]\n@C{A}t1='x'\n[DICT-END]"));
    }

    #[test]
    fn numeric_parsing_follows_plain_decimal_pattern() {
        assert_eq!(parse_numeric("-12.5"), Some(-12.5));
        assert_eq!(parse_numeric("'42'"), Some(42.0));
        assert_eq!(parse_numeric("+3"), Some(3.0));
        assert_eq!(parse_numeric("1e5"), None);
        assert_eq!(parse_numeric("NaN"), None);
        assert_eq!(parse_numeric("3."), None);
        assert_eq!(parse_numeric(".5"), None);
    }

    #[test]
    fn four_significant_digits() {
        assert_eq!(format_sig4(7.0), "7");
        assert_eq!(format_sig4(3.14159), "3.142");
        assert_eq!(format_sig4(1234.4), "1234");
        assert_eq!(format_sig4(12344.0), "1.234e+04");
        assert_eq!(format_sig4(9999.6), "1e+04");
        assert_eq!(format_sig4(0.0001234), "0.0001234");
        assert_eq!(format_sig4(0.00001234), "1.234e-05");
        assert_eq!(format_sig4(-2.5), "-2.5");
        assert_eq!(format_sig4(100000.0), "1e+05");
    }

    #[test]
    fn percentiles_use_rounded_rank() {
        let stats = ColumnStats::from_samples(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        // rank 0.5 rounds to 0, rank 4.5 rounds to 4
        assert_eq!(stats.p10, 1.0);
        assert_eq!(stats.p90, 5.0);
        assert_eq!(stats.mean, 3.5);
    }
}
