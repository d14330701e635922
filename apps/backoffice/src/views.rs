use clap::ValueEnum;
use client_core::ListEndpoint;

use crate::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ViewName {
    Customers,
    Orders,
    Invoices,
}

impl ViewName {
    pub fn key(self) -> &'static str {
        match self {
            Self::Customers => "customers",
            Self::Orders => "orders",
            Self::Invoices => "invoices",
        }
    }

    fn default_entity_set(self) -> &'static str {
        match self {
            Self::Customers => "Customers",
            Self::Orders => "Orders",
            Self::Invoices => "Invoices",
        }
    }

    fn default_search_fields(self) -> &'static [&'static str] {
        match self {
            Self::Customers => &["CompanyName", "ContactName"],
            Self::Orders => &["ShipName", "CustomerID"],
            Self::Invoices => &["ShipName", "CustomerName", "ProductName"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewPreset {
    pub endpoint: ListEndpoint,
    pub page_size: usize,
}

pub fn preset(view: ViewName, settings: &Settings) -> ViewPreset {
    let overrides = settings.views.get(view.key()).cloned().unwrap_or_default();
    let entity_set = overrides
        .entity_set
        .unwrap_or_else(|| view.default_entity_set().to_string());
    let search_fields = overrides.search_fields.unwrap_or_else(|| {
        view.default_search_fields()
            .iter()
            .map(|field| field.to_string())
            .collect()
    });

    ViewPreset {
        endpoint: ListEndpoint::new(entity_set).with_search_fields(search_fields),
        page_size: overrides.page_size.unwrap_or(settings.page_size).max(1),
    }
}
