//! Static checking of macro text before playback.

use crate::types::ValidationResult;
use tracing::debug;

/// A single delay above this is worth flagging
const LONG_DELAY_MS: u64 = 10_000;

/// Total estimated durations above this are worth flagging
const VERY_LONG_TOTAL_MS: u64 = 300_000;

/// Modelled typing rate: roughly one keystroke per 100 ms
const MS_PER_CHAR: u64 = 100;

/// Key names the dongle firmware is known to accept
const KNOWN_KEYS: &[&str] = &[
    "enter", "esc", "tab", "space", "backspace", "delete",
    "up", "down", "left", "right",
    "home", "end", "pageup", "pagedown",
    "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12",
    "ctrl", "shift", "alt", "gui", "win",
];

const DUCKY_KEYWORDS: &[&str] = &[
    "REM", "DELAY", "STRING", "STRINGLN", "GUI", "CTRL", "ALT", "SHIFT", "ENTER", "ESC", "TAB",
];

const SCRIPT_KEYWORDS: &[&str] = &[
    "VAR", "IF", "ELSE", "ENDIF", "LOOP", "ENDLOOP", "FOR", "NEXT", "WAIT", "SET_VAL",
];

/// Surface syntax family of one macro line.
///
/// Every non-blank, non-comment line belongs to exactly one family; the
/// families are checked by independent rule sets and never double-counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `{{TOKEN:ARGS}}` bracket format, the dongle's native macro language
    Bracket,
    /// DuckyScript-style keyword lines (`DELAY 500`, `STRING hello`)
    Ducky,
    /// Advanced scripting with control flow (`IF`, `LOOP`, `wait(n)`)
    Script,
    /// None of the recognized families
    Unknown,
}

/// Classify one trimmed line into its dialect
#[must_use]
pub fn classify(trimmed: &str) -> Dialect {
    if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
        return Dialect::Bracket;
    }
    let word: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_uppercase();
    if DUCKY_KEYWORDS.contains(&word.as_str()) {
        return Dialect::Ducky;
    }
    if SCRIPT_KEYWORDS.contains(&word.as_str()) {
        return Dialect::Script;
    }
    Dialect::Unknown
}

struct Scan {
    errors: Vec<String>,
    warnings: Vec<String>,
    total_ms: u64,
    command_count: usize,
    has_long_delays: bool,
}

/// Validates macro text before playback.
///
/// `validate` is a pure function of the text; warnings never block playback,
/// and callers may override errors with explicit confirmation.
#[derive(Debug, Default)]
pub struct MacroValidator;

impl MacroValidator {
    /// Check macro text and estimate its playback duration
    #[must_use]
    pub fn validate(content: &str) -> ValidationResult {
        if content.trim().is_empty() {
            return ValidationResult {
                is_valid: false,
                errors: vec!["Empty macro file".to_string()],
                warnings: Vec::new(),
                estimated_duration_ms: 0,
                command_count: 0,
                has_long_delays: false,
            };
        }

        let mut scan = Scan {
            errors: Vec::new(),
            warnings: Vec::new(),
            total_ms: 0,
            command_count: 0,
            has_long_delays: false,
        };

        for (index, line) in content.lines().enumerate() {
            let line_num = index + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with('#') {
                continue;
            }
            match classify(trimmed) {
                Dialect::Bracket => check_bracket(&mut scan, trimmed, line_num),
                Dialect::Ducky => check_ducky(&mut scan, trimmed, line_num),
                Dialect::Script => check_script(&mut scan, trimmed, line_num),
                Dialect::Unknown => scan
                    .warnings
                    .push(format!("Line {line_num}: Unknown command format '{trimmed}'")),
            }
        }

        if scan.command_count == 0 {
            scan.errors.push("No valid commands found in macro".to_string());
        }
        if scan.total_ms > VERY_LONG_TOTAL_MS {
            scan.warnings.push(format!(
                "Total estimated duration is very long: {}s ({}min)",
                scan.total_ms / 1000,
                scan.total_ms / 60_000
            ));
        }

        let is_valid = scan.errors.is_empty();
        debug!(
            "validation: valid={is_valid}, commands={}, duration={}ms, errors={}, warnings={}",
            scan.command_count,
            scan.total_ms,
            scan.errors.len(),
            scan.warnings.len()
        );
        ValidationResult {
            is_valid,
            errors: scan.errors,
            warnings: scan.warnings,
            estimated_duration_ms: scan.total_ms,
            command_count: scan.command_count,
            has_long_delays: scan.has_long_delays,
        }
    }

    /// Estimated playback duration of macro text, in milliseconds
    #[must_use]
    pub fn estimate_duration(content: &str) -> u64 {
        Self::validate(content).estimated_duration_ms
    }

    /// Render a millisecond duration for humans
    #[must_use]
    pub fn format_duration(ms: u64) -> String {
        if ms < 1000 {
            format!("{ms}ms")
        } else if ms < 60_000 {
            #[allow(clippy::cast_precision_loss)]
            let seconds = ms as f64 / 1000.0;
            format!("{seconds:.1}s")
        } else {
            format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
        }
    }
}

fn check_bracket(scan: &mut Scan, trimmed: &str, line_num: usize) {
    scan.command_count += 1;
    let inner = &trimmed[2..trimmed.len() - 2];
    let (token, args) = inner.split_once(':').unwrap_or((inner, ""));
    match token.to_ascii_uppercase().as_str() {
        "DELAY" => match args.parse::<i64>() {
            Ok(ms) if ms < 0 => {
                scan.errors
                    .push(format!("Line {line_num}: Negative delay not allowed"));
            }
            Ok(ms) => {
                let ms = ms as u64;
                scan.total_ms = scan.total_ms.saturating_add(ms);
                if ms > LONG_DELAY_MS {
                    scan.warnings.push(format!(
                        "Line {line_num}: Long delay {ms}ms ({}s)",
                        ms / 1000
                    ));
                    scan.has_long_delays = true;
                }
            }
            Err(_) => scan
                .errors
                .push(format!("Line {line_num}: Invalid delay value '{args}'")),
        },
        "SPEED" => match args.parse::<i32>() {
            Ok(speed) if !(1..=100).contains(&speed) => scan
                .warnings
                .push(format!("Line {line_num}: Speed {speed} out of range (1-100)")),
            Ok(_) => {}
            Err(_) => scan
                .errors
                .push(format!("Line {line_num}: Invalid speed value '{args}'")),
        },
        "KEY" => {
            if args.is_empty() {
                scan.errors
                    .push(format!("Line {line_num}: KEY requires key name argument"));
            } else {
                let lower = args.to_lowercase();
                if !KNOWN_KEYS.contains(&lower.as_str()) && lower.chars().count() != 1 {
                    scan.warnings.push(format!(
                        "Line {line_num}: Unknown key '{args}' (may not be supported)"
                    ));
                }
            }
        }
        "TYPE" | "TEXT" => {
            if args.is_empty() {
                scan.warnings
                    .push(format!("Line {line_num}: Empty text to type"));
            }
            scan.total_ms = scan
                .total_ms
                .saturating_add((args.chars().count() as u64).saturating_mul(MS_PER_CHAR));
        }
        "MOUSE" => {
            if args.is_empty() {
                scan.errors
                    .push(format!("Line {line_num}: MOUSE requires arguments"));
            } else if args.contains(',') {
                // A coordinate form must be exactly two integers. Bare
                // button or action tokens pass without further checks.
                let coords: Vec<&str> = args.split(',').collect();
                if coords.len() != 2 {
                    scan.errors.push(format!(
                        "Line {line_num}: MOUSE coordinates require exactly 2 values (x,y)"
                    ));
                } else if coords.iter().any(|c| c.trim().parse::<i32>().is_err()) {
                    scan.errors
                        .push(format!("Line {line_num}: Invalid mouse coordinates '{args}'"));
                }
            }
        }
        "GAMEPAD" => scan.warnings.push(format!(
            "Line {line_num}: Gamepad commands may not be supported by device"
        )),
        "AUDIO" => scan.warnings.push(format!(
            "Line {line_num}: Audio commands may not be supported by device"
        )),
        other => scan
            .warnings
            .push(format!("Line {line_num}: Unknown token '{other}'")),
    }
}

fn check_ducky(scan: &mut Scan, trimmed: &str, line_num: usize) {
    scan.command_count += 1;
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("").to_ascii_uppercase();
    let rest = parts.next().map(str::trim);

    match command.as_str() {
        "DELAY" => match rest {
            None => scan
                .errors
                .push(format!("Line {line_num}: DELAY requires millisecond value")),
            Some(value) => match value.parse::<u64>() {
                Ok(ms) => {
                    scan.total_ms = scan.total_ms.saturating_add(ms);
                    if ms > LONG_DELAY_MS {
                        scan.warnings
                            .push(format!("Line {line_num}: Long delay {ms}ms"));
                        scan.has_long_delays = true;
                    }
                }
                Err(_) => scan
                    .errors
                    .push(format!("Line {line_num}: Invalid DELAY value '{value}'")),
            },
        },
        "STRING" | "STRINGLN" => match rest {
            None => scan
                .warnings
                .push(format!("Line {line_num}: Empty string to type")),
            Some(text) => {
                scan.total_ms = scan
                    .total_ms
                    .saturating_add((text.chars().count() as u64).saturating_mul(MS_PER_CHAR));
            }
        },
        // Comment lines are recognized but not counted as commands.
        "REM" => scan.command_count -= 1,
        _ => {}
    }
}

fn check_script(scan: &mut Scan, trimmed: &str, line_num: usize) {
    scan.command_count += 1;
    scan.warnings.push(format!(
        "Line {line_num}: Advanced scripting detected - validation limited"
    ));
    if let Some(ms) = extract_wait_ms(trimmed) {
        scan.total_ms = scan.total_ms.saturating_add(ms);
    }
}

/// Pull the argument of a `wait(<n>)` call out of a scripting line
fn extract_wait_ms(line: &str) -> Option<u64> {
    let lower = line.to_ascii_lowercase();
    let start = lower.find("wait")? + 4;
    let rest = lower[start..].trim_start();
    let rest = rest.strip_prefix('(')?.trim_start();
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let after = rest[digits.len()..].trim_start();
    if !after.starts_with(')') {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_classification() {
        assert_eq!(classify("{{KEY:enter}}"), Dialect::Bracket);
        assert_eq!(classify("DELAY 500"), Dialect::Ducky);
        assert_eq!(classify("STRING hello"), Dialect::Ducky);
        assert_eq!(classify("rem a comment"), Dialect::Ducky);
        assert_eq!(classify("wait(100)"), Dialect::Script);
        assert_eq!(classify("IF $x THEN"), Dialect::Script);
        assert_eq!(classify("set_val(3, 100)"), Dialect::Script);
        assert_eq!(classify("just some text"), Dialect::Unknown);
        // Exactly one family per line, never two.
        assert_eq!(classify("{{DELAY:100}}"), Dialect::Bracket);
    }

    #[test]
    fn test_validator_is_pure() {
        let text = "{{KEY:enter}}\n{{DELAY:50}}\nwait(10)";
        assert_eq!(MacroValidator::validate(text), MacroValidator::validate(text));
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let result = MacroValidator::validate("   \n\n  ");
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["Empty macro file".to_string()]);
    }

    #[test]
    fn test_comments_and_blanks_not_counted() {
        let result = MacroValidator::validate("// header\n# note\n\n{{KEY:enter}}");
        assert!(result.is_valid);
        assert_eq!(result.command_count, 1);
    }

    #[test]
    fn test_only_unknown_lines_is_an_error() {
        let result = MacroValidator::validate("what is this\nand this");
        assert!(!result.is_valid);
        assert!(result
            .errors
            .contains(&"No valid commands found in macro".to_string()));
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_delay_rules() {
        let result = MacroValidator::validate("{{DELAY:500}}\n{{DELAY:12000}}\n{{DELAY:-5}}\n{{DELAY:abc}}");
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 2);
        assert!(result.has_long_delays);
        assert_eq!(result.estimated_duration_ms, 12_500);
    }

    #[test]
    fn test_speed_rules() {
        let result = MacroValidator::validate("{{SPEED:50}}\n{{SPEED:150}}\n{{SPEED:fast}}");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.command_count, 3);
    }

    #[test]
    fn test_key_rules() {
        let result = MacroValidator::validate("{{KEY:enter}}\n{{KEY:a}}\n{{KEY:}}\n{{KEY:superkey}}");
        assert_eq!(result.errors.len(), 1);
        // Known names and single characters pass; "superkey" warns only.
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_mouse_rules() {
        let ok = MacroValidator::validate("{{MOUSE:MOVE:10,20}}\n{{MOUSE:RESET}}\n{{MOUSE:DOWN:LEFT}}");
        assert!(ok.is_valid);

        let bad = MacroValidator::validate("{{MOUSE:}}\n{{MOUSE:1,2,3}}\n{{MOUSE:a,b}}");
        assert_eq!(bad.errors.len(), 3);
    }

    #[test]
    fn test_type_estimate_and_empty_warning() {
        let result = MacroValidator::validate("{{TYPE:hello}}\n{{TEXT:}}");
        assert!(result.is_valid);
        assert_eq!(result.estimated_duration_ms, 500);
        assert_eq!(result.warnings, vec!["Line 2: Empty text to type".to_string()]);
    }

    #[test]
    fn test_gamepad_and_audio_warn_only() {
        let result = MacroValidator::validate("{{GAMEPAD:A}}\n{{AUDIO:beep}}");
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.command_count, 2);
    }

    #[test]
    fn test_ducky_dialect() {
        let result = MacroValidator::validate("REM setup\nDELAY 500\nSTRING hello\nDELAY\nDELAY x");
        // REM is recognized but not a command.
        assert_eq!(result.command_count, 4);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.estimated_duration_ms, 1000);
    }

    #[test]
    fn test_script_dialect_extracts_waits() {
        let result = MacroValidator::validate("LOOP 3\nwait( 250 )\nENDLOOP");
        assert_eq!(result.command_count, 3);
        assert_eq!(result.estimated_duration_ms, 250);
        assert_eq!(result.warnings.len(), 3);
    }

    #[test]
    fn test_very_long_total_warns() {
        let result = MacroValidator::validate("{{DELAY:200000}}\n{{DELAY:200000}}");
        assert!(result.is_valid);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("very long")));
    }

    #[test]
    fn test_extreme_delays_saturate_estimate() {
        let text = "{{DELAY:9223372036854775807}}\n".repeat(3);
        let result = MacroValidator::validate(&text);
        assert!(result.is_valid);
        assert!(result.has_long_delays);
        assert_eq!(result.estimated_duration_ms, u64::MAX);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let text = "{{MOUSE:RESET}}\n{{DELAY:100}}\n{{KEY:a}}\n{{TYPE:hi}}";
        let result = MacroValidator::validate(text);
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert_eq!(result.command_count, 4);
        // 100ms delay plus two modelled keystrokes; settle time after the
        // key command is pacing, not estimated duration.
        assert_eq!(result.estimated_duration_ms, 300);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(MacroValidator::format_duration(800), "800ms");
        assert_eq!(MacroValidator::format_duration(1500), "1.5s");
        assert_eq!(MacroValidator::format_duration(90_000), "1m 30s");
    }
}
