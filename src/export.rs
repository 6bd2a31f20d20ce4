use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

use itertools::Itertools;
use serde::Serialize;

use crate::{
    domain::{html_tag::SocialNetwork, lead::Lead, progress::RunSummary},
    error::ExportError,
    services::RunRequest,
};

#[derive(Serialize)]
struct LeadRecord<'a> {
    name: &'a str,
    address: &'a str,
    phone: &'a str,
    category: &'a str,
    website: &'a str,
    emails: String,
    facebook: &'a str,
    instagram: &'a str,
    twitter: &'a str,
    linkedin: &'a str,
    rating: Option<f32>,
    reviews_count: Option<u32>,
    opens_at: &'a str,
    in_store_shopping: bool,
    in_store_pickup: bool,
    delivery: bool,
    introduction: &'a str,
    first_seen: String,
}

impl<'a> From<&'a Lead> for LeadRecord<'a> {
    fn from(lead: &'a Lead) -> Self {
        LeadRecord {
            name: &lead.name,
            address: &lead.address,
            phone: lead.phone.as_deref().unwrap_or_default(),
            category: lead.category.as_str(),
            website: lead.website.as_deref().unwrap_or_default(),
            emails: lead.emails.iter().map(|e| e.as_str()).join("; "),
            facebook: social(lead, SocialNetwork::Facebook),
            instagram: social(lead, SocialNetwork::Instagram),
            twitter: social(lead, SocialNetwork::Twitter),
            linkedin: social(lead, SocialNetwork::Linkedin),
            rating: lead.rating,
            reviews_count: lead.reviews_count,
            opens_at: lead.opens_at.as_deref().unwrap_or_default(),
            in_store_shopping: lead.service_options.in_store_shopping,
            in_store_pickup: lead.service_options.in_store_pickup,
            delivery: lead.service_options.delivery,
            introduction: lead.introduction.as_deref().unwrap_or_default(),
            first_seen: lead.first_seen.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

fn social(lead: &Lead, network: SocialNetwork) -> &str {
    lead.social_link(network).unwrap_or_default()
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn create_parent(path: &Path) -> Result<(), ExportError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(io_error(parent))
        }
        _ => Ok(()),
    }
}

/// Writes one row per lead. In append mode the header is only written when the
/// file is new or empty. Returns the number of rows written.
pub fn write_csv(path: &Path, leads: &[Lead], append: bool) -> Result<usize, ExportError> {
    create_parent(path)?;
    let has_content = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .map_err(io_error(path))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(!(append && has_content))
        .from_writer(file);
    for lead in leads {
        writer.serialize(LeadRecord::from(lead))?;
    }
    writer.flush().map_err(io_error(path))?;

    log::info!(
        "Saved {} leads to {} (append={})",
        leads.len(),
        path.display(),
        append
    );
    Ok(leads.len())
}

/// `results/pizza.csv` becomes `results/pizza_report.txt`.
pub fn report_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "result".to_string());
    output.with_file_name(format!("{}_report.txt", stem))
}

fn rate(part: usize, whole: usize) -> f64 {
    match whole {
        0 => 0.0,
        _ => part as f64 / whole as f64 * 100.0,
    }
}

pub fn render_report(request: &RunRequest, summary: &RunSummary, output: &Path) -> String {
    let duration = match (summary.started_at, summary.finished_at) {
        (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
        _ => 0.0,
    };
    let fmt_time = |time: Option<chrono::DateTime<chrono::Utc>>| {
        time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    let processed = summary.total_leads;

    let lines = vec![
        "Lead Extraction Report".to_string(),
        "=".repeat(50),
        String::new(),
        format!("Search: {} in {}", request.query, request.location),
        format!("Started: {}", fmt_time(summary.started_at)),
        format!("Completed: {}", fmt_time(summary.finished_at)),
        format!("Duration: {:.1} seconds", duration),
        format!("Cancelled: {}", if summary.cancelled { "yes" } else { "no" }),
        String::new(),
        "RESULTS".to_string(),
        format!("Target leads: {}", request.target),
        format!("Listings to scan: {}", request.scan_budget()),
        format!("Listings scraped: {}", summary.listings_scraped),
        format!("New leads: {}", summary.new_leads),
        format!("Leads stored or updated: {}", summary.total_leads),
        format!("Known leads skipped: {}", summary.known_skipped),
        String::new(),
        "ENRICHMENT".to_string(),
        format!(
            "Leads with email: {} ({:.1}%)",
            summary.emails_found,
            rate(summary.emails_found, processed)
        ),
        format!(
            "Leads with social media: {} ({:.1}%)",
            summary.social_found,
            rate(summary.social_found, processed)
        ),
        format!("Failed enrichments: {}", summary.failed_enrichments),
        String::new(),
        "FAILURES".to_string(),
        format!("Failed searches: {}", summary.failed_tasks),
        format!("Unreadable listings: {}", summary.parse_failures),
        format!("Failed writes: {}", summary.persistence_failures),
        String::new(),
        format!("Output file: {}", output.display()),
        format!("Report file: {}", report_path(output).display()),
    ];

    lines.join("\n") + "\n"
}

pub fn write_report(
    request: &RunRequest,
    summary: &RunSummary,
    output: &Path,
) -> Result<PathBuf, ExportError> {
    let path = report_path(output);
    create_parent(&path)?;
    fs::write(&path, render_report(request, summary, output)).map_err(io_error(&path))?;

    log::info!("Report saved to {}", path.display());
    Ok(path)
}
