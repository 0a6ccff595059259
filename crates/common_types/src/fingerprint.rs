use diesel::backend::Backend;
use diesel::deserialize::{FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::Pg;
use diesel::serialize::ToSql;
use diesel::sql_types;
use quickcheck::Arbitrary;
use serde::{Deserialize, Serialize};

/// Identifies the upstream chain (and node) that a set of stored headers was
/// observed from. Headers with different fingerprints never share a
/// backfill or an ancestry walk.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    AsExpression,
    FromSqlRow,
    derive_more::Display,
    derive_more::From,
    derive_more::FromStr,
)]
#[serde(transparent)]
#[diesel(sql_type = sql_types::Text)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl schemars::JsonSchema for Fingerprint {
    fn schema_name() -> String {
        "Fingerprint".to_owned()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        gen.subschema_for::<String>()
    }
}

impl ToSql<sql_types::Text, Pg> for Fingerprint {
    fn to_sql<'b>(
        &'b self,
        out: &mut diesel::serialize::Output<'b, '_, Pg>,
    ) -> diesel::serialize::Result {
        ToSql::<sql_types::Text, Pg>::to_sql(self.0.as_str(), &mut out.reborrow())
    }
}

impl FromSql<sql_types::Text, Pg> for Fingerprint {
    fn from_sql(bytes: <Pg as Backend>::RawValue<'_>) -> diesel::deserialize::Result<Self> {
        Ok(Fingerprint(String::from_sql(bytes)?))
    }
}

impl Arbitrary for Fingerprint {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self(String::arbitrary(g))
    }
}
