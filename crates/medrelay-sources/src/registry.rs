//! Default fetcher registry.
//!
//! Maps each [`SourceKind`] to its concrete client. The orchestrator takes
//! this map as a trait-object registry so tests can swap in mocks.

use std::collections::HashMap;
use std::sync::Arc;

use medrelay_common::net::AllowlistedClient;
use medrelay_common::RelayError;

use crate::clinicaltrials::ClinicalTrialsFetcher;
use crate::fetcher::SourceFetcher;
use crate::icd11::Icd11Fetcher;
use crate::models::SourceKind;
use crate::opentargets::OpenTargetsFetcher;
use crate::patentsview::PatentsViewFetcher;
use crate::pubchem::PubChemFetcher;
use crate::pubmed::PubMedFetcher;
use crate::reactome::ReactomeFetcher;
use crate::uspto::UsptoFetcher;

/// Credentials and per-source knobs needed to build the default fetchers.
/// Every field is optional; sources missing their credentials degrade to
/// empty results at fetch time instead of failing here.
#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    pub pubmed_api_key: Option<String>,
    pub pubmed_date_from: Option<String>,
    pub pubmed_date_to: Option<String>,
    pub patentsview_api_key: Option<String>,
    pub patent_year_from: Option<i32>,
    pub patent_year_to: Option<i32>,
    pub icd11_client_id: Option<String>,
    pub icd11_client_secret: Option<String>,
}

/// Builds one fetcher per registered source kind.
pub fn default_fetchers(
    settings: &SourceSettings,
) -> Result<HashMap<SourceKind, Arc<dyn SourceFetcher>>, RelayError> {
    let client = AllowlistedClient::new()?;

    let mut fetchers: HashMap<SourceKind, Arc<dyn SourceFetcher>> = HashMap::new();
    fetchers.insert(
        SourceKind::PubMed,
        Arc::new(
            PubMedFetcher::new(client.clone(), settings.pubmed_api_key.clone()).with_date_window(
                settings.pubmed_date_from.clone(),
                settings.pubmed_date_to.clone(),
            ),
        ),
    );
    fetchers.insert(
        SourceKind::ClinicalTrials,
        Arc::new(ClinicalTrialsFetcher::new(client.clone())),
    );
    fetchers.insert(
        SourceKind::PatentsView,
        Arc::new(
            PatentsViewFetcher::new(client.clone(), settings.patentsview_api_key.clone())
                .with_year_range(settings.patent_year_from, settings.patent_year_to),
        ),
    );
    fetchers.insert(SourceKind::Uspto, Arc::new(UsptoFetcher::new(client.clone())));
    fetchers.insert(
        SourceKind::PubChem,
        Arc::new(PubChemFetcher::new(client.clone())),
    );
    fetchers.insert(
        SourceKind::Icd11,
        Arc::new(Icd11Fetcher::new(
            client.clone(),
            settings.icd11_client_id.clone(),
            settings.icd11_client_secret.clone(),
        )),
    );
    fetchers.insert(
        SourceKind::OpenTargets,
        Arc::new(OpenTargetsFetcher::new(client.clone())),
    );
    fetchers.insert(SourceKind::Reactome, Arc::new(ReactomeFetcher::new(client)));

    Ok(fetchers)
}
