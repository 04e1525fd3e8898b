//! REST (LCD) queries: contract smart queries, oracle exchange rates and account state.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use bigdecimal::BigDecimal;
use cosmrs::AccountId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::error::Error;
use crate::msg::{GetOrderResponse, QueryMsg};
use crate::types::ContractOrder;

const ORACLE_RATES_PATH: &str = "/sei-protocol/seichain/oracle/denoms/exchange_rates";

/// Account number and sequence of a chain account.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountInfo {
    pub address: String,
    #[serde_as(as = "DisplayFromStr")]
    pub account_number: u64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Deserialize)]
struct AccountEnvelope {
    account: serde_json::Value,
}

#[derive(Deserialize)]
struct SmartQueryEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ExchangeRatesResponse {
    denom_oracle_rate_pairs: Vec<DenomRatePair>,
}

#[derive(Deserialize)]
struct DenomRatePair {
    denom: String,
    oracle_exchange_rate: OracleExchangeRate,
}

#[derive(Deserialize)]
struct OracleExchangeRate {
    exchange_rate: BigDecimal,
}

#[derive(Clone, Debug)]
pub struct LcdClient {
    http: reqwest::Client,
    endpoint: String,
}

impl LcdClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    /// Runs a CosmWasm smart query against `contract`.
    pub async fn smart_query<Q, R>(&self, contract: &AccountId, query: &Q) -> Result<R, Error>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let encoded = URL_SAFE.encode(serde_json::to_vec(query)?);
        let path = format!("/cosmwasm/wasm/v1/contract/{contract}/smart/{encoded}");
        let envelope: SmartQueryEnvelope<R> = self.get_json(&path).await?;
        Ok(envelope.data)
    }

    /// Open orders of `account` on the given market.
    pub async fn open_orders(
        &self,
        contract: &AccountId,
        account: &AccountId,
        price_denom: &str,
        asset_denom: &str,
    ) -> Result<Vec<ContractOrder>, Error> {
        let query = QueryMsg::GetOrder {
            account: account.to_string(),
            price_denom: price_denom.to_string(),
            asset_denom: asset_denom.to_string(),
        };
        let response: GetOrderResponse = self.smart_query(contract, &query).await?;
        Ok(response.orders)
    }

    /// Oracle module exchange rate for `denom`.
    pub async fn exchange_rate(&self, denom: &str) -> Result<BigDecimal, Error> {
        let response: ExchangeRatesResponse = self.get_json(ORACLE_RATES_PATH).await?;
        select_rate(response, denom)
    }

    pub async fn account(&self, address: &AccountId) -> Result<AccountInfo, Error> {
        let path = format!("/cosmos/auth/v1beta1/accounts/{address}");
        let envelope: AccountEnvelope = self.get_json(&path).await?;
        parse_account(envelope.account)
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, Error> {
        let url = format!("{}{}", self.endpoint, path);
        log::trace!("GET {url}");
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<R>().await?)
    }
}

fn select_rate(response: ExchangeRatesResponse, denom: &str) -> Result<BigDecimal, Error> {
    response
        .denom_oracle_rate_pairs
        .into_iter()
        .find(|pair| pair.denom == denom)
        .map(|pair| pair.oracle_exchange_rate.exchange_rate)
        .ok_or_else(|| Error::UnexpectedResponse(format!("no oracle rate for denom {denom}")))
}

/// Vesting and module accounts wrap the base account one level down.
fn parse_account(value: serde_json::Value) -> Result<AccountInfo, Error> {
    let base = match value.get("base_account") {
        Some(inner) => inner.clone(),
        None => match value.get("base_vesting_account") {
            Some(vesting) => vesting
                .get("base_account")
                .cloned()
                .ok_or_else(|| Error::UnexpectedResponse("vesting account without base".into()))?,
            None => value,
        },
    };
    Ok(serde_json::from_value(base)?)
}
