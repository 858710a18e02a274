// Entity models: locales own catalog entries.

pub mod entry;
pub mod locale;

pub use entry::{parse_inline_data, CatalogEntry, EntrySource, ProviderMatchBlock, PRODUCT_TYPE};
pub use locale::{
    parse_locale_sort, sort_locales, CredentialInput, LocaleDraft, LocaleRecord, LocaleSort,
    LocaleSortKey, LocaleUpdate,
};
