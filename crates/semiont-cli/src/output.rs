use semiont_core::results::{summarize, CommandResult, ResultDetails};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let render = |cells: Vec<String>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        padded.join("  ").trim_end().to_string()
    };

    println!("{}", render(headers.iter().map(|h| h.to_string()).collect()));
    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));
    for row in rows {
        println!("{}", render(row));
    }
}

/// Print results as JSON or as a table. Successful logs, exec and secret
/// results print their payload instead of a table row.
pub fn print_results(results: &[CommandResult], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&results);
    }

    let mut rows = Vec::new();
    for r in results {
        if r.success() && print_payload(r, results.len() > 1) {
            continue;
        }
        rows.push(vec![
            r.service.clone(),
            r.platform.to_string(),
            r.command.to_string(),
            if r.success() { "ok" } else { "failed" }.to_string(),
            r.summary(),
        ]);
    }
    if !rows.is_empty() {
        print_table(&["SERVICE", "PLATFORM", "COMMAND", "STATUS", "DETAIL"], rows);
    }
    Ok(())
}

fn print_payload(r: &CommandResult, label: bool) -> bool {
    let Some(details) = &r.details else {
        return false;
    };
    match details {
        ResultDetails::Logs { entries } => {
            if label {
                println!("==> {} <==", r.service);
            }
            for e in entries {
                match &e.timestamp {
                    Some(ts) => println!("{ts} [{}] {}", e.source, e.message),
                    None => println!("[{}] {}", e.source, e.message),
                }
            }
        }
        ResultDetails::Exec { stdout, stderr, .. } => {
            print!("{stdout}");
            eprint!("{stderr}");
        }
        ResultDetails::Secret {
            value: Some(value), ..
        } => println!("{value}"),
        ResultDetails::Secret { action, keys, .. } if action == "list" => {
            for k in keys {
                println!("{k}");
            }
        }
        _ => return false,
    }
    true
}

/// Error out when any result failed, so the process exits non-zero.
pub fn check_all_succeeded(results: &[CommandResult]) -> anyhow::Result<()> {
    let (_, failed) = summarize(results);
    if failed > 0 {
        anyhow::bail!("{failed} of {} operations failed", results.len());
    }
    Ok(())
}
