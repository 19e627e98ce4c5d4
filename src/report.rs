use anyhow::{Context, Result};
use tracing::debug;

use std::{
    collections::BTreeMap,
    fmt::Display,
    fs,
    path::Path,
};

use crate::{
    amount::Amount,
    model::{BoughtItem, Receipt},
};

/// Holds what was bought, grouped by product description.
///
/// To create a new, empty `Report`, use [`Report::new`].
///
/// To add receipts, use [`Report::read_dir`] or [`Report::add_receipt`].
///
/// To get a printable version of the report, use its [`Display`] implementation.
#[derive(Debug, Default)]
pub struct Report {
    products: BTreeMap<String, Product>,
    items: usize,
    total: Amount,
    discount: Amount,
}

impl Report {
    /// Creates a new, empty report.
    #[must_use]
    pub fn new() -> Report {
        Self::default()
    }

    /// Reads every cached receipt (`*.json`) directly inside `path`, and
    /// updates the report.
    ///
    /// Subdirectories and other files are ignored. Files are read in name
    /// order.
    ///
    /// # Errors
    ///
    /// Returns errors if:
    /// * The directory cannot be read
    /// * A receipt file cannot be read or parsed
    /// * A receipt has a malformed date or amount
    pub fn read_dir(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut files = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading {}", path.display()))? {
            let file = entry?.path();
            if file.is_file() && file.extension().is_some_and(|ext| ext == "json") {
                files.push(file);
            }
        }
        files.sort();
        for file in files {
            self.read_receipt(&file)?;
        }
        Ok(())
    }

    fn read_receipt(&mut self, path: &Path) -> Result<()> {
        debug!("reading {}", path.display());
        let receipt = Receipt::from_file(path)?;
        self.add_receipt(&receipt)
            .with_context(|| format!("{}", path.display()))
    }

    /// Adds every line item of `receipt` to the report.
    ///
    /// # Errors
    ///
    /// Returns an error if the receipt has a malformed date or amount; the
    /// report is left unchanged in that case.
    pub fn add_receipt(&mut self, receipt: &Receipt) -> Result<()> {
        for item in receipt.bought_items()? {
            self.add_item(&item);
        }
        Ok(())
    }

    /// Adds one line item to the group named by its exact description.
    pub fn add_item(&mut self, item: &BoughtItem) {
        let prod = self.products.entry(item.description.clone()).or_default();
        prod.items += 1;
        prod.total += item.total;
        prod.discount += item.discount;
        self.items += 1;
        self.total += item.total;
        self.discount += item.discount;
    }

    /// Returns the group for `description`, if anything was bought under it.
    #[must_use]
    pub fn product(&self, description: &str) -> Option<&Product> {
        self.products.get(description)
    }

    /// The sum of all line item totals.
    #[must_use]
    pub fn total(&self) -> Amount {
        self.total
    }

    /// The sum of all line item discounts.
    #[must_use]
    pub fn discount(&self) -> Amount {
        self.discount
    }

    /// Returns product descriptions sorted by total spent, ascending.
    ///
    /// Descriptions with identical totals are sorted alphabetically.
    #[must_use]
    pub fn products_by_total(&self) -> Vec<(&str, &Product)> {
        let mut products: Vec<_> = self
            .products
            .iter()
            .map(|(name, prod)| (name.as_str(), prod))
            .collect();
        products.sort_by(|(_, a), (_, b)| a.total.cmp(&b.total));
        products
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = "Description";
        let width = self
            .products
            .keys()
            .map(|name| name.chars().count())
            .chain([header.len()])
            .max()
            .unwrap_or_default();
        writeln!(
            f,
            "{header:width$} {:>6} {:>10} {:>12}",
            "Items", "Discount", "Total"
        )?;
        let length = width + 31;
        writeln!(f, "{:-<length$}", "")?;
        for (name, prod) in self.products_by_total() {
            writeln!(
                f,
                "{name:width$} {:6} {:>10} {:>12}",
                prod.items, prod.discount, prod.total
            )?;
        }
        writeln!(f, "{:-<length$}", "")?;
        writeln!(
            f,
            "{:width$} {:6} {:>10} {:>12}",
            "Total", self.items, self.discount, self.total
        )?;
        Ok(())
    }
}

/// Holds what was bought under one product description.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Product {
    pub items: usize,
    pub total: Amount,
    pub discount: Amount,
}
