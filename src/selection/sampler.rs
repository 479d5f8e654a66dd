use crate::Kind;
use crate::error::SamplingError;
use crate::schema::Schema;
use std::collections::BTreeMap;

/// One column to sample: the field `field` of `class` in the reduced schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SampleRequest {
    pub class: String,
    pub field: String,
    pub kind: Kind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleColumn {
    Continuous(Vec<f64>),
    Symbol(Vec<String>),
}

impl SampleColumn {
    pub fn len(&self) -> usize {
        match self {
            SampleColumn::Continuous(values) => values.len(),
            SampleColumn::Symbol(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> Kind {
        match self {
            SampleColumn::Continuous(_) => Kind::Continuous,
            SampleColumn::Symbol(_) => Kind::Symbol,
        }
    }
}

/// Sampled values keyed by `(class, field)`, plus the number of main
/// records read to produce them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Samples {
    pub objects_read: usize,
    pub columns: BTreeMap<(String, String), SampleColumn>,
}

impl Samples {
    pub fn column(&self, class: &str, field: &str) -> Option<&SampleColumn> {
        self.columns.get(&(class.to_string(), field.to_string()))
    }

    pub fn insert(&mut self, class: &str, field: &str, column: SampleColumn) {
        self.columns.insert((class.to_string(), field.to_string()), column);
    }
}

/// Reads the data described by a reduced schema and returns one sample
/// column per request. The call may block; it is the only I/O boundary of a
/// build.
pub trait SampleCollector {
    fn collect_samples(&self, reduced: &Schema, requests: &[SampleRequest]) -> Result<Samples, SamplingError>;
}

impl<F> SampleCollector for F
where
    F: Fn(&Schema, &[SampleRequest]) -> Result<Samples, SamplingError>,
{
    fn collect_samples(&self, reduced: &Schema, requests: &[SampleRequest]) -> Result<Samples, SamplingError> {
        self(reduced, requests)
    }
}

// --- In-memory sampler ------------------------------------------------------

/// Sampler over in-memory columns.
///
/// Columns are keyed by class and field name. A requested field without a
/// column of its own is looked up by the text of its formula, which is how
/// generated fields (whose names are not known in advance) are served.
#[derive(Debug, Clone, Default)]
pub struct MemorySampler {
    objects_read: usize,
    columns: BTreeMap<(String, String), SampleColumn>,
}

impl MemorySampler {
    pub fn new(objects_read: usize) -> Self {
        MemorySampler { objects_read, columns: BTreeMap::new() }
    }

    pub fn with_continuous(mut self, class: &str, key: &str, values: Vec<f64>) -> Self {
        self.columns.insert((class.to_string(), key.to_string()), SampleColumn::Continuous(values));
        self
    }

    pub fn with_symbol(mut self, class: &str, key: &str, values: Vec<String>) -> Self {
        self.columns.insert((class.to_string(), key.to_string()), SampleColumn::Symbol(values));
        self
    }

    pub fn objects_read(&self) -> usize {
        self.objects_read
    }
}

impl SampleCollector for MemorySampler {
    fn collect_samples(&self, reduced: &Schema, requests: &[SampleRequest]) -> Result<Samples, SamplingError> {
        let mut samples = Samples { objects_read: self.objects_read, columns: BTreeMap::new() };
        for request in requests {
            let missing =
                || SamplingError::MissingColumn { class: request.class.clone(), field: request.field.clone() };
            let field = reduced.entity(&request.class).and_then(|e| e.field(&request.field)).ok_or_else(missing)?;
            if !field.is_loaded() {
                return Err(SamplingError::NotLoaded { class: request.class.clone(), field: request.field.clone() });
            }

            let by_name = self.columns.get(&(request.class.clone(), field.name.clone()));
            let column = match (by_name, &field.formula) {
                (Some(column), _) => column,
                (None, Some(formula)) => {
                    self.columns.get(&(request.class.clone(), formula.to_string())).ok_or_else(missing)?
                }
                (None, None) => return Err(missing()),
            };
            if column.kind() != request.kind {
                return Err(SamplingError::KindMismatch {
                    class: request.class.clone(),
                    field: request.field.clone(),
                    expected: request.kind.label(),
                });
            }
            samples.insert(&request.class, &request.field, column.clone());
        }
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldType;
    use crate::formula::Formula;
    use crate::schema::{EntityType, Field};

    fn reduced() -> Schema {
        let formula = Formula::new("GetValue").field("Product").field("price");
        Schema::new(vec![EntityType::new("Orders")
            .with_field(Field::native("amount", FieldType::Continuous))
            .with_field(Field::native("channel", FieldType::Symbol))
            .with_field(Field::derived("ConstructedFeature1", FieldType::Continuous, formula))])
    }

    fn request(field: &str, kind: Kind) -> SampleRequest {
        SampleRequest { class: "Orders".into(), field: field.into(), kind }
    }

    #[test]
    fn columns_are_found_by_name_or_formula() {
        let sampler = MemorySampler::new(3)
            .with_continuous("Orders", "amount", vec![1.0, 2.0])
            .with_continuous("Orders", "GetValue(Product, price)", vec![9.0]);
        let samples = sampler
            .collect_samples(
                &reduced(),
                &[request("amount", Kind::Continuous), request("ConstructedFeature1", Kind::Continuous)],
            )
            .unwrap();
        assert_eq!(samples.objects_read, 3);
        assert_eq!(samples.column("Orders", "amount").map(SampleColumn::len), Some(2));
        assert_eq!(samples.column("Orders", "ConstructedFeature1"), Some(&SampleColumn::Continuous(vec![9.0])));
    }

    #[test]
    fn sampling_errors() {
        let sampler = MemorySampler::new(1).with_continuous("Orders", "channel", vec![1.0]);
        assert!(matches!(
            sampler.collect_samples(&reduced(), &[request("amount", Kind::Continuous)]),
            Err(SamplingError::MissingColumn { .. })
        ));
        assert!(matches!(
            sampler.collect_samples(&reduced(), &[request("channel", Kind::Symbol)]),
            Err(SamplingError::KindMismatch { expected: "Categorical", .. })
        ));

        let mut schema = reduced();
        if let Some(field) = schema.entity_mut("Orders").and_then(|e| e.field_mut("channel")) {
            field.set_loaded(false);
        }
        assert!(matches!(
            sampler.collect_samples(&schema, &[request("channel", Kind::Symbol)]),
            Err(SamplingError::NotLoaded { .. })
        ));
    }

    #[test]
    fn closures_are_collectors() {
        let failing = |_: &Schema, _: &[SampleRequest]| Err(SamplingError::Failed("disk".into()));
        assert_eq!(failing.collect_samples(&reduced(), &[]), Err(SamplingError::Failed("disk".into())));
    }
}
