use anyhow::{bail, Result};
use async_trait::async_trait;
use homeopathy_doctor_bot::cli::{
    run_consultation, run_until_interrupted, SessionEnd, FAREWELL, INTERRUPTED,
};
use homeopathy_doctor_bot::rag::{compose_retrieval_query, Consultant, Consultation};
use homeopathy_doctor_bot::session::ChatHistory;
use std::sync::Mutex;
use tokio::io::BufReader;

/// Answers with the retrieval query it would have used
#[derive(Default)]
struct EchoDoctor {
    seen_history_lens: Mutex<Vec<usize>>,
}

#[async_trait]
impl Consultant for EchoDoctor {
    async fn consult(&self, complaint: &str, history: &ChatHistory) -> Result<Consultation> {
        self.seen_history_lens.lock().unwrap().push(history.len());

        match complaint {
            "break retrieval" => bail!("vector store unavailable"),
            "break llm" => Ok(Consultation::failed("❌ Connection error. Please try again.")),
            _ => Ok(Consultation::answered(format!(
                "query={}",
                compose_retrieval_query(complaint, history)
            ))),
        }
    }
}

async fn run(doctor: &EchoDoctor, script: &str) -> (String, ChatHistory) {
    run_bytes(doctor, script.as_bytes()).await
}

async fn run_bytes(doctor: &EchoDoctor, script: &[u8]) -> (String, ChatHistory) {
    let mut history = ChatHistory::default();
    let mut output = Vec::new();
    run_consultation(doctor, &mut history, script, &mut output)
        .await
        .unwrap();
    (String::from_utf8(output).unwrap(), history)
}

#[tokio::test]
async fn quit_ends_the_consultation() {
    let doctor = EchoDoctor::default();
    let (output, history) = run(&doctor, "Quit\nnever read\n").await;

    assert!(output.contains("Homeopathy AI Doctor is ready!"));
    assert!(output.contains(FAREWELL));
    assert!(history.is_empty());
    assert!(doctor.seen_history_lens.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_input_asks_again() {
    let doctor = EchoDoctor::default();
    let (output, _) = run(&doctor, "   \nexit\n").await;

    assert!(output.contains("Homeopathy Doctor: Please describe your symptoms."));
    assert!(doctor.seen_history_lens.lock().unwrap().is_empty());
}

#[tokio::test]
async fn turns_accumulate_into_history() {
    let doctor = EchoDoctor::default();
    let (output, history) = run(&doctor, "sore throat\nworse on the left\nbye\n").await;

    assert!(output.contains("Homeopathy Doctor: query=sore throat"));
    assert!(output.contains(
        "Homeopathy Doctor: query=Patient's case summary: sore throat worse on the left"
    ));
    assert_eq!(history.len(), 4);
    assert_eq!(*doctor.seen_history_lens.lock().unwrap(), vec![0, 2]);
}

#[tokio::test]
async fn history_window_stays_at_six_messages() {
    let doctor = EchoDoctor::default();
    let (_, history) = run(&doctor, "one\ntwo\nthree\nfour\nfive\n").await;

    assert_eq!(history.len(), 6);
    assert_eq!(history.user_messages().collect::<Vec<_>>(), vec!["three", "four", "five"]);
}

#[tokio::test]
async fn retrieval_failure_is_reported_and_skipped() {
    let doctor = EchoDoctor::default();
    let (output, history) = run(&doctor, "break retrieval\nheadache\n").await;

    assert!(output.contains(
        "Homeopathy Doctor: I encountered an issue. Please try again. Error: vector store unavailable"
    ));
    assert_eq!(history.user_messages().collect::<Vec<_>>(), vec!["headache"]);
}

#[tokio::test]
async fn completion_failure_stays_in_history() {
    let doctor = EchoDoctor::default();
    let (output, history) = run(&doctor, "break llm\nheadache\n").await;

    assert!(output.contains("Homeopathy Doctor: ❌ Connection error. Please try again."));
    assert_eq!(history.len(), 4);
    assert_eq!(history.messages()[1].content, "❌ Connection error. Please try again.");
    assert!(output.contains("Homeopathy Doctor: query=Patient's case summary: break llm headache"));
}

#[tokio::test]
async fn unreadable_line_does_not_end_the_consultation() {
    let doctor = EchoDoctor::default();
    let (output, history) = run_bytes(&doctor, b"\xff\xfe bad\nheadache\nquit\n").await;

    assert!(output.contains("Homeopathy Doctor: I encountered an issue. Please try again. Error:"));
    assert!(output.contains("Homeopathy Doctor: query=headache"));
    assert!(output.contains(FAREWELL));
    assert_eq!(history.user_messages().collect::<Vec<_>>(), vec!["headache"]);
}

#[tokio::test]
async fn end_of_input_says_goodbye() {
    let doctor = EchoDoctor::default();
    let (output, _) = run(&doctor, "").await;
    assert!(output.trim_end().ends_with(FAREWELL));
}

#[tokio::test]
async fn interrupt_wins_over_a_blocked_read() {
    let doctor = EchoDoctor::default();
    let mut history = ChatHistory::default();
    let mut output = Vec::new();

    // the writer half stays open, so every read on the patient side pends
    let (_patient, terminal) = tokio::io::duplex(64);

    let end = run_until_interrupted(
        &doctor,
        &mut history,
        BufReader::new(terminal),
        &mut output,
        std::future::ready(()),
    )
    .await
    .unwrap();

    assert_eq!(end, SessionEnd::Interrupted);
    let output = String::from_utf8(output).unwrap();
    assert!(output.ends_with(&format!("\n\n{}\n", INTERRUPTED)));
    assert!(history.is_empty());
}

#[tokio::test]
async fn quitting_is_not_an_interruption() {
    let doctor = EchoDoctor::default();
    let mut history = ChatHistory::default();
    let mut output = Vec::new();

    let end = run_until_interrupted(
        &doctor,
        &mut history,
        "quit\n".as_bytes(),
        &mut output,
        std::future::pending::<()>(),
    )
    .await
    .unwrap();

    assert_eq!(end, SessionEnd::Finished);
    assert!(!String::from_utf8(output).unwrap().contains(INTERRUPTED));
}
