/*!
The validation-stat store: one table per snapshot with dynamic per-rule
columns, a streaming write path with batched flushes, precomputed
aggregates and on-demand filtered queries.

The backend is an embedded SQLite database per snapshot; the query
contract is independent of that choice. See [filters] for the filter
string language accepted by the query operations.
*/

pub mod filters;
pub mod store;

pub use filters::{parse_filters, validate_filters, Filter, FilterValue};
pub use store::{ObservationPage, RuleOccurrences, ValidationStatsService};
