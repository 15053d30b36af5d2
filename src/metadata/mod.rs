/*!
The in-memory tree of one record's structured metadata.

A harvested record arrives as an XML document in the harvested store
schema: a `<metadata>` root, interior `<element name="...">` nodes and
`<field name="...">text</field>` leaves. [RecordMetadata] parses that
document into a mutable arena tree and exposes dotted-path addressing over
it, e.g. `dc.title.none` or `dc.identifier.none:lang`.

Paths are parsed once into a [FieldPath]; see its docs for the wildcard
and element-selection syntax.
*/

pub mod path;
pub mod tree;

pub use path::FieldPath;
pub use tree::{NodeRef, RecordMetadata};
