//! Geração de dados pseudo-aleatórios para templates `{{faker.<categoria>.<método>}}`.
//!
//! Tabela curada de geradores; método desconhecido devolve `None` e o
//! chamador trata como expressão sem match.

use fake::faker::address::en::{CityName, StreetName, ZipCode};
use fake::faker::company::en::{Buzzword, CompanyName};
use fake::faker::internet::en::{FreeEmail, IPv4, Password, Username};
use fake::faker::lorem::en::{Paragraph, Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use fake::Fake;
use rand::Rng;
use serde_json::Value;
use uuid::Uuid;

/// Normaliza o nome do método: aceita camelCase e snake_case.
fn canonical(method: &str) -> String {
    method.replace('_', "").to_ascii_lowercase()
}

/// Gera um valor para `faker.<category>.<method>`.
pub fn generate(category: &str, method: &str) -> Option<Value> {
    let method = canonical(method);
    match (category, method.as_str()) {
        ("name" | "person", "firstname") => Some(Value::String(FirstName().fake())),
        ("name" | "person", "lastname") => Some(Value::String(LastName().fake())),
        ("name" | "person", "fullname" | "name") => Some(Value::String(Name().fake())),

        ("internet", "email") => Some(Value::String(FreeEmail().fake())),
        ("internet", "username") => Some(Value::String(Username().fake())),
        ("internet", "password") => Some(Value::String(Password(8..16).fake())),
        ("internet", "ip" | "ipv4") => Some(Value::String(IPv4().fake())),

        ("lorem", "word") => Some(Value::String(Word().fake())),
        ("lorem", "sentence") => Some(Value::String(Sentence(3..8).fake())),
        ("lorem", "paragraph") => Some(Value::String(Paragraph(2..4).fake())),

        ("company", "name") => Some(Value::String(CompanyName().fake())),
        ("company", "buzzword") => Some(Value::String(Buzzword().fake())),

        ("address", "city") => Some(Value::String(CityName().fake())),
        ("address", "street") => Some(Value::String(StreetName().fake())),
        ("address", "zipcode") => Some(Value::String(ZipCode().fake())),

        ("phone", "number") => Some(Value::String(PhoneNumber().fake())),

        ("number", "int" | "integer") => {
            Some(Value::from(rand::thread_rng().gen_range(0..100_000)))
        }
        ("number", "digit") => Some(Value::from(rand::thread_rng().gen_range(0..10))),
        ("number", "float") => {
            let f: f64 = rand::thread_rng().gen_range(0.0..1000.0);
            serde_json::Number::from_f64((f * 100.0).round() / 100.0).map(Value::Number)
        }

        ("uuid" | "datatype", "uuid" | "v4") => Some(Value::String(Uuid::new_v4().to_string())),
        ("boolean" | "datatype", "boolean" | "bool") => {
            Some(Value::Bool(rand::thread_rng().gen_bool(0.5)))
        }

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_known_categories() {
        assert!(generate("internet", "email").is_some());
        assert!(generate("name", "firstName").is_some());
        assert!(generate("name", "first_name").is_some());
        assert!(generate("uuid", "v4").is_some());
        assert!(generate("number", "int").is_some());
    }

    #[test]
    fn unknown_method_is_none() {
        assert!(generate("internet", "gibberish").is_none());
        assert!(generate("nope", "email").is_none());
    }

    #[test]
    fn uuid_is_valid() {
        let v = generate("uuid", "v4").unwrap();
        let s = v.as_str().unwrap();
        assert!(uuid::Uuid::parse_str(s).is_ok());
    }
}
