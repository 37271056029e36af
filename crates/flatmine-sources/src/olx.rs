//! OLX listing parser.
//!
//! Result pages link offers through `data-cy` attributes; offer pages carry
//! a labelled parameter list and a script blob with the map coordinates.

use chrono::NaiveDate;
use flatmine_core::{Flat, FlatmineError, Location, Offer, Result, SourceParser};
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

const BASE_URL: &str = "https://www.olx.ua/";

pub struct OlxParser {
    offer_link: Selector,
    pagination_link: Selector,
    price_block: Selector,
    posted_at: Selector,
    map_address: Selector,
    gallery_image: Selector,
    inactive_marker: Selector,
    parameter: Selector,
    price_pattern: Regex,
    point_pattern: Regex,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| FlatmineError::Scraping(e.to_string()))
}

fn text_of(element: scraper::ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Leading number of a value like `45.8 м²`.
fn lead_number(value: &str) -> Option<f64> {
    value.split_whitespace().next()?.replace(',', ".").parse().ok()
}

impl OlxParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            offer_link: selector(r#"a[data-cy="listing-ad-title"]"#)?,
            pagination_link: selector(r#"a[data-testid="pagination-link"]"#)?,
            price_block: selector(r#"[data-testid="ad-price-container"] h3"#)?,
            posted_at: selector(r#"[data-cy="ad-posted-at"]"#)?,
            map_address: selector(r#"[data-testid="map-address"]"#)?,
            gallery_image: selector(r#"img[data-testid="swiper-image"]"#)?,
            inactive_marker: selector(r#"[data-testid="ad-inactive-msg"]"#)?,
            parameter: selector(r#"ul[data-testid="parameters"] li p"#)?,
            price_pattern: Regex::new(r"([\d\s\u{a0}]+)(грн\.|\$|€)")?,
            point_pattern: Regex::new(r#""lat":\s*([\d.]+)\s*,\s*"lon":\s*([\d.]+)"#)?,
        })
    }

    fn parse_price(&self, text: &str) -> Option<(Decimal, String)> {
        let captures = self.price_pattern.captures(text)?;
        let digits: String = captures[1]
            .chars()
            .filter(|symbol| symbol.is_ascii_digit())
            .collect();
        Some((digits.parse().ok()?, captures[2].to_string()))
    }

    fn location(&self, document: &Html, markup: &str) -> Location {
        if let Some(captures) = self.point_pattern.captures(markup) {
            let lat = captures[1].parse::<f64>().ok();
            let lon = captures[2].parse::<f64>().ok();
            if let (Some(lat), Some(lon)) = (lat, lon) {
                return Location::from_point(lon, lat);
            }
        }
        match document.select(&self.map_address).next() {
            Some(element) => Location::from_address(text_of(element)),
            None => Location::Raw {
                point: None,
                address: None,
            },
        }
    }
}

impl SourceParser for OlxParser {
    fn parse_stop(&self, markup: &str) -> Option<u32> {
        let document = Html::parse_document(markup);
        document
            .select(&self.pagination_link)
            .filter_map(|link| text_of(link).parse::<u32>().ok())
            .max()
    }

    fn parse_page(&self, markup: &str) -> Vec<String> {
        let document = Html::parse_document(markup);
        let base = match Url::parse(BASE_URL) {
            Ok(base) => base,
            Err(_) => return Vec::new(),
        };
        document
            .select(&self.offer_link)
            .filter_map(|link| link.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .map(String::from)
            .collect()
    }

    fn parse_offer(&self, offer: &Offer) -> Option<Flat> {
        let document = Html::parse_document(&offer.markup);
        let mut flat = Flat::new(offer.url.clone());

        let Some(block) = document.select(&self.price_block).next() else {
            debug!(url = %offer.url, "offer page carries no price block");
            return None;
        };
        let (price, currency) = self.parse_price(&text_of(block))?;
        flat.price = Some(price);
        flat.currency = currency;

        for element in document.select(&self.parameter) {
            let parameter = text_of(element);
            if let Some(value) = parameter.strip_prefix("Загальна площа: ") {
                flat.area = lead_number(value);
            } else if let Some(value) = parameter.strip_prefix("Житлова площа: ") {
                flat.living_area = lead_number(value);
            } else if let Some(value) = parameter.strip_prefix("Площа кухні: ") {
                flat.kitchen_area = lead_number(value);
            } else if let Some(value) = parameter.strip_prefix("Кількість кімнат: ") {
                flat.rooms = value.trim().parse().ok();
            } else if let Some(value) = parameter.strip_prefix("Поверх: ") {
                flat.floor = value.trim().parse().ok();
            } else if let Some(value) = parameter.strip_prefix("Поверховість: ") {
                flat.total_floor = value.trim().parse().ok();
            } else if let Some(value) = parameter.strip_prefix("Висота стелі: ") {
                flat.ceiling_height = lead_number(value);
            } else if let Some(value) = ["Тип стін: ", "Санвузол: ", "Опалення: ", "Ремонт: "]
                .iter()
                .find_map(|label| parameter.strip_prefix(label))
            {
                flat.details.push(value.trim().to_string());
            }
        }

        flat.published = document
            .select(&self.posted_at)
            .next()
            .and_then(|element| NaiveDate::parse_from_str(&text_of(element), "%Y-%m-%d").ok());
        flat.avatar = document
            .select(&self.gallery_image)
            .next()
            .and_then(|image| image.value().attr("src"))
            .map(String::from);
        flat.location = self.location(&document, &offer.markup);

        Some(flat)
    }

    fn is_gone(&self, markup: &str) -> bool {
        let document = Html::parse_document(markup);
        document.select(&self.inactive_marker).next().is_some()
            || markup.contains("більше не доступне")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const PAGE: &str = r#"
        <html><body>
          <div data-cy="l-card">
            <a data-cy="listing-ad-title" href="/d/uk/obyavlenie/kvartira-1.html">2-к квартира</a>
          </div>
          <div data-cy="l-card">
            <a data-cy="listing-ad-title" href="https://www.olx.ua/d/uk/obyavlenie/kvartira-2.html">3-к квартира</a>
          </div>
          <ul>
            <li><a data-testid="pagination-link" href="?page=2">2</a></li>
            <li><a data-testid="pagination-link" href="?page=25">25</a></li>
          </ul>
        </body></html>
    "#;

    const OFFER: &str = r#"
        <html><body>
          <div data-testid="ad-price-container"><h3>45 800 $</h3></div>
          <span data-cy="ad-posted-at">2026-08-12</span>
          <img data-testid="swiper-image" src="https://img.olx.ua/1.jpg">
          <ul data-testid="parameters">
            <li><p>Загальна площа: 45.8 м²</p></li>
            <li><p>Житлова площа: 28 м²</p></li>
            <li><p>Площа кухні: 9.5 м²</p></li>
            <li><p>Кількість кімнат: 2</p></li>
            <li><p>Поверх: 6</p></li>
            <li><p>Поверховість: 9</p></li>
            <li><p>Тип стін: цегла</p></li>
          </ul>
          <script>window.__PRERENDERED_STATE__ = "{\"map\":{}}";</script>
          <script>var map = {"lat": 50.4501, "lon": 30.5234};</script>
        </body></html>
    "#;

    #[test]
    fn page_links_are_absolutized() {
        let urls = OlxParser::new().unwrap().parse_page(PAGE);
        assert_eq!(
            urls,
            vec![
                "https://www.olx.ua/d/uk/obyavlenie/kvartira-1.html".to_string(),
                "https://www.olx.ua/d/uk/obyavlenie/kvartira-2.html".to_string(),
            ]
        );
    }

    #[test]
    fn stop_is_the_highest_pagination_index() {
        assert_eq!(OlxParser::new().unwrap().parse_stop(PAGE), Some(25));
        assert_eq!(OlxParser::new().unwrap().parse_stop("<html></html>"), None);
    }

    #[test]
    fn offer_fields_are_extracted() {
        let offer = Offer {
            url: "https://www.olx.ua/d/uk/obyavlenie/kvartira-1.html".to_string(),
            markup: OFFER.to_string(),
        };
        let flat = OlxParser::new().unwrap().parse_offer(&offer).unwrap();
        assert_eq!(flat.price, Some(dec!(45800)));
        assert_eq!(flat.currency, "$");
        assert_eq!(flat.area, Some(45.8));
        assert_eq!(flat.living_area, Some(28.0));
        assert_eq!(flat.kitchen_area, Some(9.5));
        assert_eq!(flat.rooms, Some(2));
        assert_eq!(flat.floor, Some(6));
        assert_eq!(flat.total_floor, Some(9));
        assert_eq!(flat.published, NaiveDate::from_ymd_opt(2026, 8, 12));
        assert_eq!(flat.avatar.as_deref(), Some("https://img.olx.ua/1.jpg"));
        assert_eq!(flat.details, vec!["цегла".to_string()]);
        assert_eq!(flat.location.point(), Some((30.5234, 50.4501)));
    }

    #[test]
    fn priceless_offer_is_unparsed() {
        let offer = Offer {
            url: "https://www.olx.ua/d/uk/obyavlenie/kvartira-1.html".to_string(),
            markup: "<html><body><h3>no price here</h3></body></html>".to_string(),
        };
        assert!(OlxParser::new().unwrap().parse_offer(&offer).is_none());
    }

    #[test]
    fn hryvnia_price_keeps_its_symbol() {
        let parser = OlxParser::new().unwrap();
        let (price, currency) = parser.parse_price("1 200 000 грн.").unwrap();
        assert_eq!(price, dec!(1200000));
        assert_eq!(currency, "грн.");
    }

    #[test]
    fn inactive_marker_means_gone() {
        let parser = OlxParser::new().unwrap();
        assert!(parser.is_gone(r#"<div data-testid="ad-inactive-msg">Це оголошення більше не доступне</div>"#));
        assert!(!parser.is_gone(OFFER));
    }
}
