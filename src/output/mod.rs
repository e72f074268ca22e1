use crate::protocol::ProtocolResult;
use crate::error::PKResult;
use chrono::Utc;
use std::path::Path;
use std::fs::File;
use log::info;

pub fn save_results<P: AsRef<Path>>(result: &ProtocolResult, output_dir: P) -> PKResult<()> {
    let output_path = output_dir.as_ref();

    save_protocol_json(result, &output_path.join("protocol.json"))?;
    save_trajectory(result, &output_path.join("trajectory.csv"))?;
    save_adjustments(result, &output_path.join("adjustments.csv"))?;
    save_comparison(result, &output_path.join("comparison.csv"))?;
    generate_report(result, output_path)?;

    info!("All results saved to {:?}", output_path);
    Ok(())
}

fn save_protocol_json<P: AsRef<Path>>(result: &ProtocolResult, path: P) -> PKResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, result)?;
    Ok(())
}

fn save_trajectory<P: AsRef<Path>>(result: &ProtocolResult, path: P) -> PKResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record([
        "TIME", "CE", "PLASMA", "INFUSION_RATE", "ADJUSTMENTS", "BOLUS"
    ])?;

    for sample in &result.trajectory {
        writer.write_record(&[
            format!("{:.1}", sample.time),
            sample.ce.to_string(),
            sample.plasma.to_string(),
            sample.infusion_rate.to_string(),
            sample.cumulative_adjustment_count.to_string(),
            (sample.is_bolus_event as u8).to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn save_adjustments<P: AsRef<Path>>(result: &ProtocolResult, path: P) -> PKResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record([
        "SEQ", "TIME", "OLD_RATE", "NEW_RATE", "CE", "REDUCTION_PCT"
    ])?;

    for event in &result.adjustments {
        writer.write_record(&[
            event.sequence_number.to_string(),
            format!("{:.1}", event.time),
            event.old_rate.to_string(),
            event.new_rate.to_string(),
            event.ce_at_event.to_string(),
            event.reduction_percent.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn save_comparison<P: AsRef<Path>>(result: &ProtocolResult, path: P) -> PKResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record([
        "RANK", "BOLUS_DOSE", "OPTIMAL_RATE", "PREDICTED_CE", "ADJUSTMENTS",
        "FINAL_CE", "ACCURACY_PCT", "SCORE", "TIER",
    ])?;

    for (rank, row) in result.comparison.iter().enumerate() {
        writer.write_record(&[
            (rank + 1).to_string(),
            row.bolus_dose.to_string(),
            row.optimal_rate.to_string(),
            row.predicted_ce.to_string(),
            row.adjustment_count.to_string(),
            row.metrics.final_ce.to_string(),
            row.metrics.target_accuracy_percent.to_string(),
            row.score.to_string(),
            row.tier.label().to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn format_minutes(value: f64) -> String {
    if value.is_finite() {
        format!("{:.1} min", value)
    } else {
        "not reached".to_string()
    }
}

/// Markdown summary for the clinician.
pub fn generate_report<P: AsRef<Path>>(result: &ProtocolResult, output_dir: P) -> PKResult<()> {
    let report_path = output_dir.as_ref().join("protocol_report.md");
    let p = &result.parameters;
    let m = &result.metrics;

    let steps = result.steps.iter()
        .enumerate()
        .map(|(i, step)| format!("{}. `{}` {}", i + 1, step.label, step.description))
        .collect::<Vec<_>>()
        .join("\n");

    let comparison = if result.comparison.is_empty() {
        "_Comparison sweep not run._".to_string()
    } else {
        let mut table = String::from(
            "| Bolus (mg) | Rate (mg/kg/hr) | Adjustments | Final Ce | Accuracy | Score | Tier |\n\
             |---|---|---|---|---|---|---|\n",
        );
        for row in &result.comparison {
            table.push_str(&format!(
                "| {:.0} | {:.1} | {} | {:.3} | {:.1}% | {:.1} | {} |\n",
                row.bolus_dose,
                row.optimal_rate,
                row.adjustment_count,
                row.metrics.final_ce,
                row.metrics.target_accuracy_percent,
                row.score,
                row.tier.label(),
            ));
        }
        table
    };

    let report_content = format!(
        r#"# Infusion Protocol Report

Generated {} for patient **{}**.

## PK Parameters
- V1 / V2 / V3: {:.3} / {:.3} / {:.3} L
- CL / Q2 / Q3: {:.3} / {:.3} / {:.3} L/min
- ke0: {:.4} /min

## Dosing
- Bolus: {:.1} mg
- Target Ce: {:.2} ug/mL
- Continuous rate: {:.1} mg/kg/hr (predicted Ce {:.3} ug/mL, error {:.1}%)

### Steps
{}

## Performance (maintenance window from 60 min)
- Final Ce: {:.3} ug/mL
- Max Ce: {:.3} ug/mL
- Mean deviation: {:.3} ug/mL
- Within +/-10% of target: {:.1}%
- Stability index: {:.1}
- Convergence: {}

## Bolus Comparison
{}
"#,
        Utc::now().to_rfc3339(),
        result.patient_id,
        p.v1, p.v2, p.v3,
        p.cl, p.q2, p.q3,
        p.ke0,
        result.bolus_dose,
        result.target_ce,
        result.optimal_rate,
        result.optimization.predicted_ce,
        result.optimization.relative_error,
        steps,
        m.final_ce,
        m.max_ce,
        m.avg_deviation,
        m.target_accuracy_percent,
        m.stability_index,
        format_minutes(m.convergence_time),
        comparison,
    );

    std::fs::write(report_path, report_content)?;
    Ok(())
}
