//! Generated demo domain: customers with orders of products.
//!
//! Data is drawn from a seeded `StdRng`, so a given seed always yields the
//! same samples, candidates and therefore the same built schema.

use chrono::{Datelike, Days, NaiveDate};
use fieldsmith::{
    BuildError, BuildRequest, ConstructedRule, DefaultCatalogue, DimensionId, EntityType, Field, FieldRef, FieldType,
    MemorySampler, PartRef, PartitionSpace, Schema, TemplateCatalogue,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const CHANNELS: [&str; 4] = ["web", "store", "phone", "partner"];
const CHANNEL_WEIGHTS: [f64; 4] = [0.5, 0.3, 0.15, 0.05];

pub struct Demo {
    pub request: BuildRequest,
    pub sampler: MemorySampler,
    pub orders: usize,
}

struct Dimensions {
    amount: DimensionId,
    channel: DimensionId,
    year_day: DimensionId,
}

pub fn demo(customers: usize, seed: u64, reference: NaiveDate) -> Result<Demo, BuildError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut amounts = Vec::new();
    let mut channels = Vec::new();
    let mut year_days = Vec::new();
    for _ in 0..customers {
        for _ in 0..rng.random_range(0..8) {
            // Skewed amounts: mostly small baskets, a few large ones.
            let amount: f64 =
                if rng.random_bool(0.8) { rng.random_range(5.0..60.0) } else { rng.random_range(60.0..500.0) };
            amounts.push((amount * 100.0).round() / 100.0);
            channels.push(pick_channel(&mut rng).to_string());
            let age = Days::new(rng.random_range(0..730));
            let date = reference.checked_sub_days(age).unwrap_or(reference);
            year_days.push(f64::from(date.ordinal()));
        }
    }

    let orders = amounts.len();
    let sampler = MemorySampler::new(customers)
        .with_continuous("Orders", "amount", amounts)
        .with_symbol("Orders", "channel", channels)
        .with_continuous("Orders", "YearDay(date)", year_days);

    let mut space = PartitionSpace::new();
    let dimensions = Dimensions {
        amount: space.add_field_dimension("Orders", FieldRef::new("amount", FieldType::Continuous))?,
        channel: space.add_field_dimension("Orders", FieldRef::new("channel", FieldType::Symbol))?,
        year_day: space.add_rule_dimension(rule("YearDay", "Orders")?.field("date", FieldType::Date))?,
    };
    let rules = candidates(&mut space, &dimensions)?;

    Ok(Demo { request: BuildRequest { schema: schema(), space, rules }, sampler, orders })
}

fn pick_channel(rng: &mut StdRng) -> &'static str {
    let mut draw: f64 = rng.random();
    for (channel, weight) in CHANNELS.iter().zip(CHANNEL_WEIGHTS) {
        if draw < weight {
            return channel;
        }
        draw -= weight;
    }
    CHANNELS[0]
}

fn schema() -> Schema {
    Schema::new(vec![
        EntityType::new("Customer")
            .with_field(Field::native("id", FieldType::Symbol))
            .with_field(Field::native("birthdate", FieldType::Date))
            .with_field(Field::native("signup", FieldType::Timestamp))
            .with_field(Field::native("churn", FieldType::Symbol))
            .with_field(Field::native("Orders", orders())),
        EntityType::new("Orders")
            .with_field(Field::native("amount", FieldType::Continuous))
            .with_field(Field::native("channel", FieldType::Symbol))
            .with_field(Field::native("date", FieldType::Date))
            .with_field(Field::native("Product", FieldType::Object("Product".into()))),
        EntityType::new("Product")
            .with_field(Field::native("price", FieldType::Continuous))
            .with_field(Field::native("category", FieldType::Symbol)),
    ])
}

fn orders() -> FieldType {
    FieldType::ObjectArray("Orders".into())
}

fn rule(name: &str, class: &str) -> Result<ConstructedRule, BuildError> {
    let template = DefaultCatalogue
        .lookup(name)
        .ok_or_else(|| BuildError::Contract(format!("no template {name} in the default catalogue")))?;
    Ok(ConstructedRule::new(template, class))
}

/// Candidate rules of the demo. Costs grow with rule depth and partition
/// size, the way a rule enumerator would price them.
fn candidates(space: &mut PartitionSpace, dimensions: &Dimensions) -> Result<Vec<ConstructedRule>, BuildError> {
    let table = FieldRef::new("Orders", orders());
    let price = rule("GetValue", "Orders")?
        .field("Product", FieldType::Object("Product".into()))
        .field("price", FieldType::Continuous);

    let mut rules = vec![
        rule("TableCount", "Customer")?.field("Orders", orders()).with_cost(1.0),
        rule("TableSum", "Customer")?.field("Orders", orders()).field("amount", FieldType::Continuous).with_cost(1.5),
        rule("TableMean", "Customer")?.field("Orders", orders()).field("amount", FieldType::Continuous).with_cost(1.5),
        rule("TableMode", "Customer")?.field("Orders", orders()).field("channel", FieldType::Symbol).with_cost(1.5),
        rule("TableMean", "Customer")?.field("Orders", orders()).rule(price.clone()).with_cost(2.0),
        rule("TableMax", "Customer")?.field("Orders", orders()).rule(price).with_cost(2.0),
        rule("YearDay", "Customer")?.field("birthdate", FieldType::Date).with_cost(1.0),
        rule("GetDate", "Customer")?.field("signup", FieldType::Timestamp).with_cost(1.0),
    ];

    let layouts: [&[(DimensionId, usize)]; 4] = [
        &[(dimensions.amount, 2)],
        &[(dimensions.amount, 4)],
        &[(dimensions.channel, 4)],
        &[(dimensions.year_day, 2), (dimensions.amount, 2)],
    ];
    for layout in layouts {
        let partition = space.add_partition("Customer", table.clone(), layout)?;
        let size: usize = layout.iter().map(|(_, granularity)| granularity).product();
        let cost = 2.0 + (size as f64).log2();
        for cell in 0..size {
            let mut indexes = Vec::with_capacity(layout.len());
            let mut rest = cell;
            for (_, granularity) in layout {
                indexes.push(rest % granularity);
                rest /= granularity;
            }
            let part = space.add_part(partition, indexes, cost)?;
            rules.extend(selection_rules(part, cost)?);
        }
    }
    Ok(rules)
}

fn selection_rules(part: PartRef, cost: f64) -> Result<Vec<ConstructedRule>, BuildError> {
    let selection = rule("TableSelection", "Customer")?.field("Orders", orders()).part(part);
    Ok(vec![
        rule("TableCount", "Customer")?.rule(selection.clone()).with_cost(cost),
        rule("TableSum", "Customer")?
            .rule(selection.clone())
            .field("amount", FieldType::Continuous)
            .with_cost(cost + 0.5),
        rule("TableMode", "Customer")?.rule(selection).field("channel", FieldType::Symbol).with_cost(cost + 0.5),
    ])
}
