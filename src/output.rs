use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};
use serde::Serialize;

use crate::providers::{Classification, ProviderDefinition};
use crate::types::DailyAggregate;

const HISTORY_HEADER: &[&str] = &["Date", "Calls", "Energy", "Water", "CO2", "Top provider"];

fn format_kwh(kwh: f64) -> String {
    if kwh >= 1.0 {
        format!("{:.2} kWh", kwh)
    } else {
        format!("{:.1} Wh", kwh * 1_000.0)
    }
}

fn format_liters(l: f64) -> String {
    if l >= 1.0 {
        format!("{:.2} L", l)
    } else {
        format!("{:.0} mL", l * 1_000.0)
    }
}

fn format_co2(kg: f64) -> String {
    if kg >= 1.0 {
        format!("{:.2} kg", kg)
    } else {
        format!("{:.0} g", kg * 1_000.0)
    }
}

fn histogram(map: &std::collections::BTreeMap<String, u64>) -> String {
    DailyAggregate::top(map)
        .iter()
        .map(|(name, n)| format!("{name} ({n})"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Sum of several days. Footprint fields are summed as stored.
pub fn totals<'a>(days: impl IntoIterator<Item = &'a DailyAggregate>) -> DailyAggregate {
    let mut total = DailyAggregate::empty("TOTAL");
    for day in days {
        total.call_count += day.call_count;
        total.total_tokens_in += day.total_tokens_in;
        total.total_tokens_out += day.total_tokens_out;
        total.kwh += day.kwh;
        total.water_liters += day.water_liters;
        total.co2_kg += day.co2_kg;
        for (k, v) in &day.providers {
            *total.providers.entry(k.clone()).or_insert(0) += v;
        }
        for (k, v) in &day.models {
            *total.models.entry(k.clone()).or_insert(0) += v;
        }
    }
    total
}

fn history_row(day: &DailyAggregate) -> Vec<Cell> {
    let top = DailyAggregate::top(&day.providers)
        .first()
        .map(|(name, _)| name.to_string())
        .unwrap_or_default();
    vec![
        Cell::new(&day.date),
        Cell::new(day.call_count),
        Cell::new(format_kwh(day.kwh)),
        Cell::new(format_liters(day.water_liters)),
        Cell::new(format_co2(day.co2_kg)),
        Cell::new(top),
    ]
}

pub fn print_aggregate(day: &DailyAggregate) {
    let mut table = new_table();
    table.set_header(vec![Cell::new(&day.date), Cell::new("")]);
    table.add_row(vec![Cell::new("Calls"), Cell::new(day.call_count)]);
    table.add_row(vec![Cell::new("Energy"), Cell::new(format_kwh(day.kwh))]);
    table.add_row(vec![
        Cell::new("Water"),
        Cell::new(format_liters(day.water_liters)),
    ]);
    table.add_row(vec![Cell::new("CO2"), Cell::new(format_co2(day.co2_kg))]);
    table.add_row(vec![Cell::new("Providers"), Cell::new(histogram(&day.providers))]);
    table.add_row(vec![Cell::new("Models"), Cell::new(histogram(&day.models))]);
    println!("{table}");
}

pub fn print_history(days: &[&DailyAggregate]) {
    let mut table = new_table();
    table.set_header(HISTORY_HEADER.iter().map(Cell::new));
    for day in days {
        table.add_row(history_row(day));
    }
    table.add_row(history_row(&totals(days.iter().copied())));
    println!("{table}");
}

pub fn print_classification(url: &str, class: Option<&Classification>) {
    match class {
        Some(c) => println!("{url}\n  provider: {}\n  model:    {}", c.provider, c.model),
        None => println!("{url}\n  not tracked"),
    }
}

pub fn print_providers(providers: &[ProviderDefinition]) {
    let mut table = new_table();
    table.set_header(vec![Cell::new("Provider"), Cell::new("Domains")]);
    for p in providers {
        table.add_row(vec![Cell::new(&p.name), Cell::new(p.domains.join(", "))]);
    }
    println!("{table}");
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("JSON serialization failed")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(date: &str, calls: u64, provider: &str) -> DailyAggregate {
        let mut agg = DailyAggregate::empty(date);
        agg.call_count = calls;
        agg.kwh = calls as f64 * 0.00045;
        agg.providers.insert(provider.to_string(), calls);
        agg.models.insert("gpt-4".to_string(), calls);
        agg
    }

    #[test]
    fn units_switch_at_one() {
        assert_eq!(format_kwh(0.0015), "1.5 Wh");
        assert_eq!(format_kwh(2.5), "2.50 kWh");
        assert_eq!(format_liters(0.3), "300 mL");
        assert_eq!(format_co2(0.075), "75 g");
        assert_eq!(format_co2(12.0), "12.00 kg");
    }

    #[test]
    fn totals_merge_histograms() {
        let a = day("2024-01-01", 2, "openai");
        let b = day("2024-01-02", 3, "anthropic");
        let t = totals([&a, &b]);
        assert_eq!(t.date, "TOTAL");
        assert_eq!(t.call_count, 5);
        assert_eq!(t.providers["openai"], 2);
        assert_eq!(t.providers["anthropic"], 3);
        assert_eq!(t.models["gpt-4"], 5);
        assert!((t.kwh - 0.00225).abs() < 1e-12);
    }

    #[test]
    fn history_row_names_top_provider() {
        let mut d = day("2024-01-01", 4, "openai");
        d.providers.insert("cohere".into(), 1);
        let row = history_row(&d);
        assert_eq!(row.len(), HISTORY_HEADER.len());
        assert_eq!(row[5].content(), "openai");
    }

    #[test]
    fn histogram_orders_by_count() {
        let mut d = DailyAggregate::empty("2024-01-01");
        d.providers.insert("a".into(), 1);
        d.providers.insert("b".into(), 3);
        assert_eq!(histogram(&d.providers), "b (3), a (1)");
    }
}
